//! Kubernetes client configuration

use std::str::FromStr;

pub use kube_client::Client;

/// Command-line arguments used to configure Kubernetes clients
#[derive(Clone, Debug, clap::Args)]
pub struct ClientArgs {
    /// The kubeconfig context used for the default cluster
    #[clap(long)]
    pub context: Option<String>,

    /// The identifier of the default cluster
    #[clap(long, default_value = "default")]
    pub cluster_name: String,

    /// Additional clusters, each as `id=context`
    #[clap(long = "cluster", value_name = "ID=CONTEXT")]
    pub clusters: Vec<ClusterContext>,
}

/// Names a cluster and the kubeconfig context used to reach it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterContext {
    pub id: String,
    pub context: String,
}

/// Indicates that a Kubernetes client could not be configured
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The kubeconfig could not be loaded
    #[error(transparent)]
    Kubeconfig(#[from] kube_client::config::KubeconfigError),

    /// Neither an in-cluster nor a local configuration could be inferred
    #[error(transparent)]
    Infer(#[from] kube_client::config::InferConfigError),

    /// The client could not be built from the configuration
    #[error(transparent)]
    Client(#[from] kube_client::Error),
}

/// Indicates that a `--cluster` argument is not of the form `id=context`
#[derive(Debug, thiserror::Error)]
#[error("invalid cluster {0:?}: expected ID=CONTEXT")]
pub struct InvalidClusterContext(String);

// === impl ClientArgs ===

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            context: None,
            cluster_name: "default".to_string(),
            clusters: Vec::new(),
        }
    }
}

impl ClientArgs {
    /// Builds the client for the default cluster
    pub async fn try_client(&self) -> Result<Client, ConfigError> {
        let config = match self.context.as_deref() {
            Some(context) => load_context(context).await?,
            None => kube_client::Config::infer().await?,
        };
        Ok(Client::try_from(config)?)
    }

    /// Builds clients for every additional cluster, keyed by cluster identifier
    pub async fn try_cluster_clients(&self) -> Result<Vec<(String, Client)>, ConfigError> {
        let mut clients = Vec::with_capacity(self.clusters.len());
        for ClusterContext { id, context } in &self.clusters {
            let config = load_context(context).await?;
            clients.push((id.clone(), Client::try_from(config)?));
        }
        Ok(clients)
    }
}

async fn load_context(context: &str) -> Result<kube_client::Config, ConfigError> {
    let opts = kube_client::config::KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    Ok(kube_client::Config::from_kubeconfig(&opts).await?)
}

// === impl ClusterContext ===

impl FromStr for ClusterContext {
    type Err = InvalidClusterContext;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((id, context)) if !id.is_empty() && !context.is_empty() => Ok(Self {
                id: id.to_string(),
                context: context.to_string(),
            }),
            _ => Err(InvalidClusterContext(s.to_string())),
        }
    }
}

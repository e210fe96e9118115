//! The service runtime
//!
//! A [`Runtime`] owns the process scaffolding: logging, one Kubernetes client and informer cache
//! per cluster, signal handling, the admin server and, optionally, the API server.

use crate::{
    admin::{self, Readiness},
    cache::{Cached, IndexerCache, LogAndSleep, WatchKind, WatchMetrics, Writers},
    client::{self, Client, ClientArgs},
    cluster::{Cluster, ClusterMeta, Clusters},
    initialized::Initialized,
    log::filter_from_env,
    release::HelmClient,
    server::{self, ServerArgs},
    shutdown, LogFilter, LogFormat, LogInitError,
};
use futures_util::StreamExt;
use kube_client::Api;
use kube_runtime::{reflector, reflector::store::Writer, watcher};
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tower::Service;
use tracing::{debug, info_span, Instrument};

/// Builds the Helm client for a cluster
pub type MakeHelm = Arc<dyn Fn(&ClusterMeta) -> Arc<dyn HelmClient> + Send + Sync>;

/// Configures a [`Runtime`]
#[derive(Default)]
#[must_use]
pub struct Builder<S = NoServer> {
    admin: admin::Builder,
    client: Option<ClientArgs>,
    error_delay: Option<Duration>,
    log: Option<LogSettings>,
    helm: Option<MakeHelm>,
    server: S,
}

/// Provides infrastructure for running the service:
///
/// * logging
/// * a Kubernetes client and informer cache for every configured cluster
/// * signal handling and graceful shutdown
/// * an admin server with readiness, liveness and metrics endpoints
#[must_use]
pub struct Runtime<S = NoServer> {
    admin: admin::Bound,
    clusters: Clusters,
    initialized: Initialized,
    metrics: Registry,
    shutdown_rx: drain::Watch,
    shutdown: shutdown::Shutdown,
    server: S,
}

/// Indicates that no API server is configured
#[derive(Debug, Default)]
pub struct NoServer(());

/// Indicates that the [`Builder`] could not configure a [`Runtime`]
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Indicates that logging could not be initialized
    #[error(transparent)]
    LogInit(#[from] LogInitError),

    /// Indicates that the admin server could not be bound
    #[error("failed to bind admin server: {0}")]
    Admin(#[source] std::io::Error),

    /// Indicates that a Kubernetes client could not be initialized
    #[error(transparent)]
    Client(#[from] client::ConfigError),

    /// Indicates that the API server could not be initialized
    #[error(transparent)]
    Server(#[from] server::Error),

    /// Indicates that a signal handler could not be registered
    #[error(transparent)]
    Signal(#[from] shutdown::RegisterError),
}

#[derive(Debug)]
struct LogSettings {
    filter: LogFilter,
    format: LogFormat,
}

/// Spawns a cached watch for every kind of one cluster
struct Watches<'a> {
    cluster: &'a str,
    client: Client,
    error_delay: Duration,
    metrics: &'a WatchMetrics,
    initialized: &'a mut Initialized,
    shutdown: &'a drain::Watch,
}

// === impl Builder ===

impl<S> Builder<S> {
    const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(5);

    /// Configures the runtime to use the given admin [`admin::Builder`]
    pub fn with_admin(mut self, admin: impl Into<admin::Builder>) -> Self {
        self.admin = admin.into();
        self
    }

    /// Configures the runtime to use the given [`ClientArgs`]
    pub fn with_client(mut self, client: ClientArgs) -> Self {
        self.client = Some(client);
        self
    }

    /// Configures the runtime to use the given logging configuration
    pub fn with_log(mut self, filter: LogFilter, format: LogFormat) -> Self {
        self.log = Some(LogSettings { filter, format });
        self
    }

    /// Configures the runtime to use the given fixed delay when a watch fails repeatedly
    pub fn with_fixed_delay_on_error(mut self, delay: Duration) -> Self {
        self.error_delay = Some(delay);
        self
    }

    /// Serves releases on every cluster through a client built by `helm`
    ///
    /// Without one, release requests fail with `resource-not-ready`.
    pub fn with_helm(
        mut self,
        helm: impl Fn(&ClusterMeta) -> Arc<dyn HelmClient> + Send + Sync + 'static,
    ) -> Self {
        self.helm = Some(Arc::new(helm));
        self
    }

    async fn build_inner(self) -> Result<Runtime<S>, BuildError> {
        self.log.unwrap_or_default().try_init()?;

        let args = self.client.unwrap_or_default();
        let mut clients = vec![(args.cluster_name.clone(), args.try_client().await?)];
        clients.extend(args.try_cluster_clients().await?);

        let (shutdown, shutdown_rx) = shutdown::sigint_or_sigterm()?;
        let admin = self.admin.bind().map_err(BuildError::Admin)?;

        let mut metrics = Registry::with_prefix("kubeview");
        let watch_metrics = WatchMetrics::register(&mut metrics);
        let error_delay = self.error_delay.unwrap_or(Self::DEFAULT_ERROR_DELAY);

        let mut initialized = Initialized::default();
        let mut clusters = Clusters::default();
        for (id, client) in clients {
            let meta = ClusterMeta::new(id);
            let synced = Readiness::default();

            let writers = Writers::default();
            let stores = writers.stores();
            let mut cluster_init = Initialized::default();
            writers.watch_all(&mut Watches {
                cluster: &meta.id,
                client: client.clone(),
                error_delay,
                metrics: &watch_metrics,
                initialized: &mut cluster_init,
                shutdown: &shutdown_rx,
            });

            // The process becomes ready only once every cluster has synced.
            let handle = initialized.add_handle();
            tokio::spawn({
                let synced = synced.clone();
                async move {
                    cluster_init.initialized().await;
                    synced.set(true);
                    debug!("synced");
                    drop(handle);
                }
                .instrument(info_span!("cluster", id = %meta.id))
            });

            let cache = Arc::new(IndexerCache::new(meta.id.clone(), stores, synced));
            let mut cluster = Cluster::new(meta, cache, client);
            if let Some(helm) = self.helm.as_ref() {
                let helm = helm(cluster.meta());
                cluster = cluster.with_helm(helm);
            }
            clusters.insert(cluster);
        }

        Ok(Runtime {
            admin,
            clusters,
            initialized,
            metrics,
            shutdown_rx,
            shutdown,
            // Server must be bound by `Builder::build`
            server: self.server,
        })
    }
}

impl Builder<NoServer> {
    /// Configures the runtime to start an API server with the given [`ServerArgs`]
    pub fn with_server(self, server: ServerArgs) -> Builder<ServerArgs> {
        Builder {
            server,
            admin: self.admin,
            client: self.client,
            error_delay: self.error_delay,
            log: self.log,
            helm: self.helm,
        }
    }

    /// Attempts to build a runtime by initializing logs, loading Kubernetes clients, starting
    /// informer caches, registering signal handlers and binding an admin server
    pub async fn build(self) -> Result<Runtime<NoServer>, BuildError> {
        self.build_inner().await
    }
}

impl Builder<ServerArgs> {
    /// Attempts to build a runtime as [`Builder::build`] does and also binds the API server
    pub async fn build(self) -> Result<Runtime<server::Bound>, BuildError> {
        let rt = self.build_inner().await?;
        let server = rt.server.bind().await?;

        Ok(Runtime {
            server,
            admin: rt.admin,
            clusters: rt.clusters,
            initialized: rt.initialized,
            metrics: rt.metrics,
            shutdown_rx: rt.shutdown_rx,
            shutdown: rt.shutdown,
        })
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Builder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("admin", &self.admin)
            .field("client", &self.client)
            .field("error_delay", &self.error_delay)
            .field("log", &self.log)
            .field("helm", &self.helm.is_some())
            .field("server", &self.server)
            .finish()
    }
}

// === impl Runtime ===

impl<S> Runtime<S> {
    /// Returns every configured cluster
    pub fn clusters(&self) -> Clusters {
        self.clusters.clone()
    }

    /// Obtains a handle to the admin server's readiness state
    #[inline]
    pub fn readiness(&self) -> Readiness {
        self.admin.readiness()
    }

    /// Returns the registry exposed on the admin server's `/metrics` endpoint
    pub fn metrics_registry(&mut self) -> &mut Registry {
        &mut self.metrics
    }

    /// Obtains a handle that can be used to instrument graceful shutdown
    #[inline]
    pub fn shutdown_handle(&self) -> shutdown::Watch {
        self.shutdown_rx.clone()
    }
}

impl Runtime<server::Bound> {
    /// Returns the bound local address of the API server
    pub fn server_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    /// Spawns the API server with the given `service`. A runtime handle without the bound server
    /// configuration is returned.
    ///
    /// The server shuts down gracefully when the runtime is shutdown.
    pub fn spawn_server<T, B>(self, service: T) -> Runtime<NoServer>
    where
        T: Service<hyper::Request<hyper::body::Incoming>, Response = hyper::Response<B>>
            + Clone
            + Send
            + 'static,
        T::Error: std::error::Error + Send + Sync,
        T::Future: Send,
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::error::Error + Send + Sync,
    {
        self.server.spawn(service, self.shutdown_rx.clone());

        Runtime {
            admin: self.admin,
            clusters: self.clusters,
            initialized: self.initialized,
            metrics: self.metrics,
            server: NoServer(()),
            shutdown_rx: self.shutdown_rx,
            shutdown: self.shutdown,
        }
    }
}

impl Runtime<NoServer> {
    /// Creates a runtime builder
    pub fn builder() -> Builder<NoServer> {
        Builder::default()
    }

    /// Runs the runtime until it is shutdown
    ///
    /// Shutdown starts when a SIGINT or SIGTERM signal is received and completes when all
    /// components have terminated gracefully or when a subsequent signal is received.
    ///
    /// The admin server's readiness endpoint returns success only once every cluster cache has
    /// synced and then returns an error after shutdown is initiated.
    pub async fn run(self) -> Result<(), shutdown::Aborted> {
        let Self {
            admin,
            initialized,
            metrics,
            shutdown,
            shutdown_rx,
            ..
        } = self;

        let admin = admin.spawn(metrics);

        let ready = admin.readiness();
        tokio::spawn(async move {
            initialized.initialized().await;
            ready.set(true);
            debug!("initialized");

            drop(shutdown_rx.signaled().await);
            ready.set(false);
            debug!("shutdown");
        });

        shutdown.signaled().await?;

        Ok(())
    }
}

// === impl Watches ===

impl WatchKind for Watches<'_> {
    fn watch<K: Cached>(&mut self, writer: Writer<K>) {
        let api = Api::<K>::all(self.client.clone());
        let watch = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()));
        let watch = self.metrics.clone().instrument(K::PLURAL, watch);
        let watch = LogAndSleep::fixed_delay(K::PLURAL, self.error_delay, watch);
        let watch = self.initialized.add_handle().release_on_synced(watch);
        let watch = shutdown::CancelOnShutdown::new(self.shutdown.clone(), watch);

        tokio::spawn(
            watch
                .for_each(|_| futures_util::future::ready(()))
                .instrument(info_span!("watch", cluster = %self.cluster, kind = K::PLURAL)),
        );
    }
}

// === impl LogSettings ===

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: filter_from_env(),
            format: LogFormat::default(),
        }
    }
}

impl LogSettings {
    fn try_init(self) -> Result<(), LogInitError> {
        self.format.try_init(self.filter)
    }
}

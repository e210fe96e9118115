//! Pre-install setup of a tenant namespace
//!
//! Before a release is installed into a namespace, the namespace gets a deployer service account
//! and a role binding granting it the deployer cluster role within that namespace only. Each write
//! is retried when etcd reports a commit timeout, and an object that already exists counts as done.

use crate::Error;
use backon::{ConstantBuilder, Retryable};
use k8s_openapi::api::{
    core::v1::ServiceAccount,
    rbac::v1::{ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject},
};
use kube_client::{api::PostParams, Api, Client};
use kube_core::ObjectMeta;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, time::Duration};
use tracing::{debug, info, warn};

/// The name of the deployer service account and cluster role
pub const DEPLOYER: &str = "kubeview-deployer";

const CLUSTER_ADMIN: &str = "cluster-admin";

/// Writes are attempted at most this many times
const MAX_ATTEMPTS: usize = 6;

#[derive(Clone)]
pub struct Setup {
    client: Client,
    allow_cluster_admin_fallback: bool,
    retry_delay: Duration,
}

// === impl Setup ===

impl Setup {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            allow_cluster_admin_fallback: false,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Binds `cluster-admin` when the deployer cluster role may not be created
    pub fn with_cluster_admin_fallback(mut self, allow: bool) -> Self {
        self.allow_cluster_admin_fallback = allow;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Ensures the deployer service account exists in `namespace` and may manage that namespace
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error> {
        let accounts = Api::<ServiceAccount>::namespaced(self.client.clone(), namespace);
        self.ensure(
            &accounts,
            ServiceAccount {
                metadata: meta(DEPLOYER),
                ..Default::default()
            },
        )
        .await?;

        let role = self.ensure_cluster_role().await?;

        // A namespaced binding confines the cluster role's grant to `namespace`.
        let bindings = Api::<RoleBinding>::namespaced(self.client.clone(), namespace);
        self.ensure(
            &bindings,
            RoleBinding {
                metadata: ObjectMeta {
                    namespace: Some(namespace.to_string()),
                    ..meta(DEPLOYER)
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: role.clone(),
                },
                subjects: Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: DEPLOYER.to_string(),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                }]),
            },
        )
        .await?;
        info!(%namespace, %role, "namespace set up");
        Ok(())
    }

    /// Returns the name of the cluster role deployers are bound to
    async fn ensure_cluster_role(&self) -> Result<String, Error> {
        let roles = Api::<ClusterRole>::all(self.client.clone());
        let deployer = ClusterRole {
            metadata: meta(DEPLOYER),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["*".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        };
        match self.ensure(&roles, deployer).await {
            Ok(()) => Ok(DEPLOYER.to_string()),
            Err(Error::Forbidden(msg)) if self.allow_cluster_admin_fallback => {
                warn!(%msg, "may not create the deployer role; falling back to {CLUSTER_ADMIN}");
                roles.get(CLUSTER_ADMIN).await?;
                Ok(CLUSTER_ADMIN.to_string())
            }
            Err(error) => Err(error),
        }
    }

    /// Creates `obj`, retrying etcd timeouts and treating an existing object as success
    async fn ensure<K>(&self, api: &Api<K>, obj: K) -> Result<(), Error>
    where
        K: kube_core::Resource + Clone + Debug + Serialize + DeserializeOwned,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        let create = || async {
            api.create(&PostParams::default(), &obj)
                .await
                .map_err(Error::from)
        };
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(MAX_ATTEMPTS - 1);
        let res = create
            .retry(backoff)
            .when(Error::is_etcd_timeout)
            .notify(|error, delay| debug!(%error, ?delay, "retrying"))
            .await;
        match res {
            Ok(_) => {
                debug!(%name, "created");
                Ok(())
            }
            Err(Error::Conflict(_)) => {
                debug!(%name, "already exists");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

impl Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("allow_cluster_admin_fallback", &self.allow_cluster_admin_fallback)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

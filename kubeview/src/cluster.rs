//! Cluster handles

use crate::{cache::IndexerCache, client::Client, release::HelmClient, Error};
use ahash::AHashMap;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};

/// Identifies the cluster an entity was read from
///
/// Stamped into every returned entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMeta {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// A downstream cluster: its informer caches and a client for writes
#[derive(Clone)]
pub struct Cluster {
    meta: ClusterMeta,
    cache: Arc<IndexerCache>,
    client: Client,
    helm: Option<Arc<dyn HelmClient>>,
}

/// The set of clusters served by this process
#[derive(Clone, Default)]
pub struct Clusters(AHashMap<String, Arc<Cluster>>);

// === impl ClusterMeta ===

impl ClusterMeta {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            attributes: BTreeMap::new(),
        }
    }
}

// === impl Cluster ===

impl Cluster {
    pub fn new(meta: ClusterMeta, cache: Arc<IndexerCache>, client: Client) -> Self {
        Self {
            meta,
            cache,
            client,
            helm: None,
        }
    }

    /// Serves releases through the given Helm client
    pub fn with_helm(mut self, helm: Arc<dyn HelmClient>) -> Self {
        self.helm = Some(helm);
        self
    }

    pub fn meta(&self) -> &ClusterMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn cache(&self) -> &Arc<IndexerCache> {
        &self.cache
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Fails with `resource-not-ready` when no Helm client is configured for the cluster
    pub fn helm(&self) -> Result<&Arc<dyn HelmClient>, Error> {
        self.helm.as_ref().ok_or_else(|| {
            Error::ResourceNotReady(format!("no Helm client for cluster {}", self.meta.id))
        })
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("meta", &self.meta)
            .field("synced", &self.cache.is_synced())
            .field("helm", &self.helm.is_some())
            .finish()
    }
}

// === impl Clusters ===

impl Clusters {
    pub fn insert(&mut self, cluster: Cluster) {
        self.0.insert(cluster.id().to_string(), Arc::new(cluster));
    }

    /// Resolves a cluster by identifier
    pub fn get(&self, id: &str) -> Result<Arc<Cluster>, Error> {
        self.0
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cluster {id}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Cluster>> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

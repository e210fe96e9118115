//! Per-cluster informer caches
//!
//! An [`IndexerCache`] holds a reflector [`Store`] for every watched kind. Stores are written only
//! by watches (or, in tests, by feeding watcher events to [`Writers`]) and read through typed
//! listers that return snapshots safe for concurrent iteration.

use crate::{admin::Readiness, namespace::NamespaceQuery, Error};
use kube_core::Resource;
use kube_runtime::{
    reflector::{store::Writer, ObjectRef, Store},
    watcher,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc};

mod kinds;
pub mod selector;
pub mod watch;

pub use self::{
    kinds::{Stores, WatchKind, Writers},
    selector::Selector,
    watch::{LogAndSleep, WatchMetrics},
};

/// A kind with a store in every [`IndexerCache`]
pub trait Cached:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// The canonical plural resource name
    const PLURAL: &'static str;

    const NAMESPACED: bool;

    fn store(stores: &Stores) -> &Store<Self>;

    fn writer(writers: &mut Writers) -> &mut Writer<Self>;
}

/// Read-only informer snapshots for one cluster
#[derive(Clone)]
pub struct IndexerCache {
    cluster: String,
    stores: Stores,
    synced: Readiness,
}

// === impl IndexerCache ===

impl IndexerCache {
    /// Creates a cache over `stores` that becomes usable once `synced` is set
    pub fn new(cluster: impl Into<String>, stores: Stores, synced: Readiness) -> Self {
        Self {
            cluster: cluster.into(),
            stores,
            synced,
        }
    }

    /// Creates an already-synced cache over the given writers
    pub fn from_writers(cluster: impl Into<String>, writers: &Writers) -> Self {
        let synced = Readiness::default();
        synced.set(true);
        Self::new(cluster, writers.stores(), synced)
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Returns true once every watch has completed its initial list
    pub fn is_synced(&self) -> bool {
        self.synced.get()
    }

    fn ensure_synced(&self) -> Result<(), Error> {
        if self.is_synced() {
            return Ok(());
        }
        Err(Error::ServiceUnavailable(self.cluster.clone()))
    }

    /// Lists every cached `K` visible to `namespaces` whose labels match `selector`
    ///
    /// Items are ordered by namespace and then name.
    pub fn list<K: Cached>(
        &self,
        namespaces: &NamespaceQuery,
        selector: &Selector,
    ) -> Result<Vec<Arc<K>>, Error> {
        self.ensure_synced()?;
        let mut items = K::store(&self.stores)
            .state()
            .into_iter()
            .filter(|obj| namespaces.matches(obj.meta().namespace.as_deref()))
            .filter(|obj| selector.matches(obj.meta().labels.as_ref()))
            .collect::<Vec<_>>();
        items.sort_by(|a, b| {
            let (a, b) = (a.meta(), b.meta());
            (a.namespace.as_deref(), a.name.as_deref())
                .cmp(&(b.namespace.as_deref(), b.name.as_deref()))
        });
        Ok(items)
    }

    /// Lists every cached `K` visible to `namespaces`
    pub fn list_all<K: Cached>(&self, namespaces: &NamespaceQuery) -> Result<Vec<Arc<K>>, Error> {
        self.list(namespaces, &Selector::everything())
    }

    /// Looks up a single object
    ///
    /// `namespace` is ignored for cluster-scoped kinds.
    pub fn get<K: Cached>(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>, Error> {
        self.ensure_synced()?;
        let mut key = ObjectRef::<K>::new(name);
        if K::NAMESPACED {
            let ns = namespace.ok_or_else(|| {
                Error::BadRequest(format!("{} are namespaced", K::PLURAL))
            })?;
            key = key.within(ns);
        }
        K::store(&self.stores)
            .get(&key)
            .ok_or_else(|| Error::not_found(K::PLURAL, namespace.filter(|_| K::NAMESPACED), name))
    }
}

impl Debug for IndexerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerCache")
            .field("cluster", &self.cluster)
            .field("synced", &self.is_synced())
            .finish()
    }
}

// === impl Writers ===

impl Writers {
    /// Inserts or replaces an object
    pub fn apply<K: Cached>(&mut self, obj: K) {
        K::writer(self).apply_watcher_event(&watcher::Event::Apply(obj));
    }

    /// Removes an object
    pub fn delete<K: Cached>(&mut self, obj: K) {
        K::writer(self).apply_watcher_event(&watcher::Event::Delete(obj));
    }
}

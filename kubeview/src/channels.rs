//! Per-request producer bundles over the informer caches
//!
//! Each [`Source`] opened on a [`ResourceChannels`] bundle spawns one producer that lists a kind
//! from the cache and hands the result over exactly once. Producers never block: the handoff is a
//! oneshot, and a reader that goes away simply drops the result. Assemblers open every source they
//! need up front and then drain them in a fixed order, returning the first error.

use crate::{
    cache::{Cached, IndexerCache, Selector},
    namespace::NamespaceQuery,
    Error,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace};

/// A bundle of producers reading from one cluster's caches
#[derive(Debug)]
pub struct ResourceChannels {
    cache: Arc<IndexerCache>,
    namespaces: NamespaceQuery,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// The read side of a single producer
#[derive(Debug)]
#[must_use = "sources deliver their items only when received"]
pub struct Source<K> {
    rx: oneshot::Receiver<Result<Vec<Arc<K>>, Error>>,
}

// === impl ResourceChannels ===

impl ResourceChannels {
    pub fn new(
        cache: Arc<IndexerCache>,
        namespaces: NamespaceQuery,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            namespaces,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    pub fn namespaces(&self) -> &NamespaceQuery {
        &self.namespaces
    }

    /// Opens a producer for every `K` in the bundle's namespaces
    pub fn open<K: Cached>(&self) -> Source<K> {
        self.open_in(self.namespaces.clone(), Selector::everything())
    }

    /// Opens a producer for every `K` in the bundle's namespaces matching `selector`
    pub fn open_selected<K: Cached>(&self, selector: Selector) -> Source<K> {
        self.open_in(self.namespaces.clone(), selector)
    }

    /// Opens a producer with its own namespace predicate
    pub fn open_in<K: Cached>(&self, namespaces: NamespaceQuery, selector: Selector) -> Source<K> {
        let (tx, rx) = oneshot::channel();
        let cache = self.cache.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                res = async { cache.list::<K>(&namespaces, &selector) } => res,
            };
            if let Ok(ref items) = res {
                trace!(kind = K::PLURAL, items = items.len(), "produced");
            }
            if tx.send(res).is_err() {
                debug!(kind = K::PLURAL, "source dropped before delivery");
            }
        });
        Source { rx }
    }

    /// Returns the number of producers that have not yet completed
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every producer in the bundle to complete
    pub async fn close(self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

// === impl Source ===

impl<K> Source<K> {
    /// Waits for the producer's single handoff
    ///
    /// A producer that went away without delivering is reported as cancelled.
    pub async fn recv(self) -> Result<Vec<Arc<K>>, Error> {
        self.rx.await.unwrap_or(Err(Error::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{admin::Readiness, cache::Writers};
    use k8s_openapi::{
        api::{
            apps::v1::{Deployment, ReplicaSet},
            core::v1::{Event, Pod},
        },
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    fn cache() -> Arc<IndexerCache> {
        let mut writers = Writers::default();
        for (ns, name) in [("a", "p1"), ("a", "p2"), ("b", "p3")] {
            writers.apply(Pod {
                metadata: ObjectMeta {
                    namespace: Some(ns.to_string()),
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            });
        }
        Arc::new(IndexerCache::from_writers("test", &writers))
    }

    #[tokio::test]
    async fn every_source_delivers_once() {
        let channels =
            ResourceChannels::new(cache(), NamespaceQuery::one("a"), CancellationToken::new());
        let pods = channels.open::<Pod>();
        let deploys = channels.open::<Deployment>();
        assert_eq!(pods.recv().await.unwrap().len(), 2);
        assert!(deploys.recv().await.unwrap().is_empty());
        channels.close().await;
    }

    #[tokio::test]
    async fn abandoned_sources_do_not_leak() {
        let channels =
            ResourceChannels::new(cache(), NamespaceQuery::All, CancellationToken::new());
        for _ in 0..16 {
            drop(channels.open::<Pod>());
        }
        let tasks = channels.tasks.clone();
        channels.close().await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_requests_deliver_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let channels = ResourceChannels::new(cache(), NamespaceQuery::All, cancel);
        assert_eq!(channels.open::<Pod>().recv().await.unwrap_err(), Error::Cancelled);
        channels.close().await;
    }

    #[tokio::test]
    async fn first_error_reaps_every_producer() {
        let stores = Writers::default().stores();
        let cache = Arc::new(IndexerCache::new("test", stores, Readiness::default()));

        // Assemblers return on the first failed source, dropping the bundle and the rest unread.
        async fn assemble(channels: ResourceChannels) -> Result<usize, Error> {
            let deploys = channels.open::<Deployment>();
            let replicasets = channels.open::<ReplicaSet>();
            let pods = channels.open::<Pod>();
            let events = channels.open::<Event>();
            let n = deploys.recv().await?.len()
                + replicasets.recv().await?.len()
                + pods.recv().await?.len()
                + events.recv().await?.len();
            channels.close().await;
            Ok(n)
        }

        let channels = ResourceChannels::new(cache, NamespaceQuery::All, CancellationToken::new());
        let tasks = channels.tasks.clone();
        let err = assemble(channels).await.unwrap_err();
        assert_eq!(err, Error::ServiceUnavailable("test".to_string()));

        tasks.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), tasks.wait())
            .await
            .expect("producers must complete");
        assert!(tasks.is_empty());
    }
}

//! Per-request context
//!
//! A [`RequestContext`] is built once per request and passed explicitly to every assembler. It
//! carries the resolved cluster, the caller's identity, and a cancellation token observed by every
//! producer the request spawns.

use crate::{
    cache::IndexerCache, channels::ResourceChannels, cluster::Cluster, namespace::NamespaceQuery,
    ClusterMeta, Error,
};
use ahash::AHashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The caller, as asserted by the fronting identity plane
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub default_namespace: String,
    pub namespaces: AHashSet<String>,
    pub admin: bool,
}

/// Everything a request handler needs, scoped to one request
#[derive(Clone, Debug)]
pub struct RequestContext {
    cluster: Arc<Cluster>,
    identity: Identity,
    cancel: CancellationToken,
}

// === impl Identity ===

impl Identity {
    /// A tenant owning exactly its default namespace
    pub fn tenant(user: impl Into<String>, namespace: impl Into<String>) -> Self {
        let default_namespace = namespace.into();
        Self {
            user: user.into(),
            namespaces: std::iter::once(default_namespace.clone()).collect(),
            default_namespace,
            admin: false,
        }
    }

    /// A cluster administrator
    pub fn admin(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            default_namespace: "default".to_string(),
            namespaces: AHashSet::new(),
            admin: true,
        }
    }

    /// Grants access to additional namespaces
    pub fn with_namespaces(mut self, namespaces: impl IntoIterator<Item = String>) -> Self {
        self.namespaces.extend(namespaces);
        self
    }

    /// Returns true if the caller may read and write in `ns`
    pub fn owns(&self, ns: &str) -> bool {
        self.admin || self.default_namespace == ns || self.namespaces.contains(ns)
    }

    /// Returns every namespace the caller may read
    pub fn visible_namespaces(&self) -> NamespaceQuery {
        if self.admin {
            return NamespaceQuery::All;
        }
        let mut namespaces = self.namespaces.clone();
        namespaces.insert(self.default_namespace.clone());
        NamespaceQuery::Only(namespaces)
    }

    pub fn authorize_namespace(&self, ns: &str) -> Result<(), Error> {
        if self.owns(ns) {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "user {} may not access namespace {ns}",
            self.user
        )))
    }

    pub fn require_admin(&self) -> Result<(), Error> {
        if self.admin {
            return Ok(());
        }
        Err(Error::Forbidden(format!(
            "user {} is not a cluster administrator",
            self.user
        )))
    }
}

// === impl RequestContext ===

impl RequestContext {
    pub fn new(cluster: Arc<Cluster>, identity: Identity) -> Self {
        Self {
            cluster,
            identity,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses the given token so that an outer scope may cancel the request
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn cluster_meta(&self) -> &ClusterMeta {
        self.cluster.meta()
    }

    pub fn cache(&self) -> &Arc<IndexerCache> {
        self.cluster.cache()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels every producer spawned on behalf of this request
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Opens a producer bundle over the cluster's caches, filtered by `namespaces`
    pub fn channels(&self, namespaces: NamespaceQuery) -> ResourceChannels {
        ResourceChannels::new(self.cache().clone(), namespaces, self.cancel.child_token())
    }

    /// Opens a producer bundle scoped to a single namespace
    pub fn channels_in(&self, ns: &str) -> ResourceChannels {
        self.channels(NamespaceQuery::one(ns))
    }

    /// Fails with `forbidden` unless the caller owns `ns`
    pub fn authorize_namespace(&self, ns: &str) -> Result<(), Error> {
        self.identity.authorize_namespace(ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_own_their_namespaces() {
        let alice = Identity::tenant("alice", "alice").with_namespaces(["shared".to_string()]);
        assert!(alice.owns("alice"));
        assert!(alice.owns("shared"));
        assert!(!alice.owns("bob"));
        assert!(alice.require_admin().is_err());
        assert!(Identity::admin("root").owns("bob"));

        let visible = alice.visible_namespaces();
        assert!(visible.matches(Some("shared")));
        assert!(!visible.matches(Some("bob")));
        assert!(Identity::admin("root").visible_namespaces().is_all());
    }
}

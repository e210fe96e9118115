//! The adapter registry
//!
//! Every served kind is registered once, under its canonical plural and its keyword. The HTTP
//! layer resolves a path segment to an [`Adapter`] and dispatches through it without knowing the
//! kind's view types.

use crate::{
    context::RequestContext,
    event,
    resource::{
        configmap, cronjob, daemonset, deployment, hpa, ingress, job, namespace, node, pod, pv,
        pvc, rbac, replicaset, secret, service, statefulset, storageclass, ListRequest,
    },
    resource_map,
    verber::Verber,
    Error,
};
use ahash::AHashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Serves one kind
///
/// Reads go through the kind's assemblers. Writes default to the kind-agnostic [`Verber`].
#[async_trait::async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// The canonical plural, e.g. `deployments`
    fn plural(&self) -> &'static str;

    /// The singular keyword, e.g. `deployment`
    fn keyword(&self) -> &'static str;

    async fn list(&self, ctx: &RequestContext, req: &ListRequest) -> Result<Value, Error>;

    async fn get(
        &self,
        ctx: &RequestContext,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, Error>;

    async fn create(
        &self,
        ctx: &RequestContext,
        namespace: Option<&str>,
        body: Value,
    ) -> Result<Value, Error> {
        let created = Verber::for_request(ctx)
            .create(self.plural(), namespace, body)
            .await?;
        to_json(created)
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        namespace: Option<&str>,
        name: &str,
        body: Value,
    ) -> Result<Value, Error> {
        let updated = Verber::for_request(ctx)
            .update(self.plural(), namespace, name, body)
            .await?;
        to_json(updated)
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        Verber::for_request(ctx)
            .delete(self.plural(), namespace, name)
            .await
    }
}

/// Adapters by plural and keyword
#[derive(Clone)]
pub struct Registry {
    adapters: AHashMap<&'static str, Arc<dyn Adapter>>,
}

fn to_json(value: impl Serialize) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|error| Error::Internal(error.to_string()))
}

fn namespaced<'a>(namespace: Option<&'a str>, plural: &str) -> Result<&'a str, Error> {
    namespace
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::BadRequest(format!("{plural} are namespaced")))
}

macro_rules! adapters {
    ($(
        $ty:ident($plural:literal, $keyword:literal) {
            list($lctx:ident, $req:ident) => $list:expr,
            get($gctx:ident, $ns:ident, $name:ident) => $get:expr $(,)?
        }
    )+) => {
        $(
            struct $ty;

            #[async_trait::async_trait]
            impl Adapter for $ty {
                fn plural(&self) -> &'static str {
                    $plural
                }

                fn keyword(&self) -> &'static str {
                    $keyword
                }

                async fn list(
                    &self,
                    $lctx: &RequestContext,
                    $req: &ListRequest,
                ) -> Result<Value, Error> {
                    to_json($list)
                }

                async fn get(
                    &self,
                    $gctx: &RequestContext,
                    $ns: Option<&str>,
                    $name: &str,
                ) -> Result<Value, Error> {
                    to_json($get)
                }
            }
        )+

        fn builtin() -> Vec<Arc<dyn Adapter>> {
            vec![$(Arc::new($ty)),+]
        }
    };
}

adapters! {
    Pods("pods", "pod") {
        list(ctx, req) => pod::list(ctx, req).await?,
        get(ctx, ns, name) => pod::get(ctx, namespaced(ns, "pods")?, name).await?,
    }
    Deployments("deployments", "deployment") {
        list(ctx, req) => deployment::list(ctx, req).await?,
        get(ctx, ns, name) => deployment::get(ctx, namespaced(ns, "deployments")?, name).await?,
    }
    ReplicaSets("replicasets", "replicaset") {
        list(ctx, req) => replicaset::list(ctx, req).await?,
        get(ctx, ns, name) => replicaset::get(ctx, namespaced(ns, "replicasets")?, name).await?,
    }
    StatefulSets("statefulsets", "statefulset") {
        list(ctx, req) => statefulset::list(ctx, req).await?,
        get(ctx, ns, name) => statefulset::get(ctx, namespaced(ns, "statefulsets")?, name).await?,
    }
    DaemonSets("daemonsets", "daemonset") {
        list(ctx, req) => daemonset::list(ctx, req).await?,
        get(ctx, ns, name) => daemonset::get(ctx, namespaced(ns, "daemonsets")?, name).await?,
    }
    Jobs("jobs", "job") {
        list(ctx, req) => job::list(ctx, req).await?,
        get(ctx, ns, name) => job::get(ctx, namespaced(ns, "jobs")?, name).await?,
    }
    CronJobs("cronjobs", "cronjob") {
        list(ctx, req) => cronjob::list(ctx, req).await?,
        get(ctx, ns, name) => cronjob::get(ctx, namespaced(ns, "cronjobs")?, name).await?,
    }
    Services("services", "service") {
        list(ctx, req) => service::list(ctx, req).await?,
        get(ctx, ns, name) => service::get(ctx, namespaced(ns, "services")?, name).await?,
    }
    Ingresses("ingresses", "ingress") {
        list(ctx, req) => ingress::list(ctx, req).await?,
        get(ctx, ns, name) => ingress::get(ctx, namespaced(ns, "ingresses")?, name).await?,
    }
    ConfigMaps("configmaps", "configmap") {
        list(ctx, req) => configmap::list(ctx, req).await?,
        get(ctx, ns, name) => configmap::get(ctx, namespaced(ns, "configmaps")?, name)?,
    }
    Secrets("secrets", "secret") {
        list(ctx, req) => secret::list(ctx, req).await?,
        get(ctx, ns, name) => secret::get(ctx, namespaced(ns, "secrets")?, name)?,
    }
    Claims("persistentvolumeclaims", "persistentvolumeclaim") {
        list(ctx, req) => pvc::list(ctx, req).await?,
        get(ctx, ns, name) => pvc::get(ctx, namespaced(ns, "persistentvolumeclaims")?, name).await?,
    }
    Volumes("persistentvolumes", "persistentvolume") {
        list(ctx, req) => pv::list(ctx, req).await?,
        get(ctx, _ns, name) => pv::get(ctx, name)?,
    }
    StorageClasses("storageclasses", "storageclass") {
        list(ctx, req) => storageclass::list(ctx, req).await?,
        get(ctx, _ns, name) => storageclass::get(ctx, name).await?,
    }
    Namespaces("namespaces", "namespace") {
        list(ctx, req) => namespace::list(ctx, req).await?,
        get(ctx, _ns, name) => namespace::get(ctx, name).await?,
    }
    Nodes("nodes", "node") {
        list(ctx, req) => node::list(ctx, req).await?,
        get(ctx, _ns, name) => node::get(ctx, name).await?,
    }
    Events("events", "event") {
        list(ctx, req) => event::list(ctx, req).await?,
        get(ctx, ns, name) => event::get(ctx, namespaced(ns, "events")?, name)?,
    }
    Autoscalers("horizontalpodautoscalers", "horizontalpodautoscaler") {
        list(ctx, req) => hpa::list(ctx, req).await?,
        get(ctx, ns, name) => hpa::get(ctx, namespaced(ns, "horizontalpodautoscalers")?, name)?,
    }
    Roles("roles", "role") {
        list(ctx, req) => rbac::list_roles(ctx, req).await?,
        get(ctx, ns, name) => rbac::get_role(ctx, namespaced(ns, "roles")?, name)?,
    }
    RoleBindings("rolebindings", "rolebinding") {
        list(ctx, req) => rbac::list_role_bindings(ctx, req).await?,
        get(ctx, ns, name) => rbac::get_role_binding(ctx, namespaced(ns, "rolebindings")?, name)?,
    }
    ClusterRoles("clusterroles", "clusterrole") {
        list(ctx, req) => rbac::list_cluster_roles(ctx, req).await?,
        get(ctx, _ns, name) => rbac::get_cluster_role(ctx, name)?,
    }
    ClusterRoleBindings("clusterrolebindings", "clusterrolebinding") {
        list(ctx, req) => rbac::list_cluster_role_bindings(ctx, req).await?,
        get(ctx, _ns, name) => rbac::get_cluster_role_binding(ctx, name)?,
    }
}

// === impl Registry ===

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self {
            adapters: AHashMap::new(),
        };
        for adapter in builtin() {
            registry.register(adapter);
        }
        registry
    }
}

impl Registry {
    /// Registers an adapter under its plural and keyword, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.keyword(), adapter.clone());
        self.adapters.insert(adapter.plural(), adapter);
    }

    /// Resolves an adapter by plural, keyword or any alias the resource map accepts
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Adapter>, Error> {
        self.adapters
            .get(name)
            .or_else(|| {
                resource_map::normalize(name).and_then(|plural| self.adapters.get(plural))
            })
            .ok_or_else(|| Error::NotFound(format!("resource kind {name}")))
    }

    /// Returns true if `plural` names a cluster-scoped kind
    pub fn is_cluster_scoped(&self, plural: &str) -> bool {
        resource_map::lookup(plural).is_ok_and(|info| !info.namespaced)
    }

    /// Returns the canonical plural of every registered kind, sorted
    pub fn plurals(&self) -> Vec<&'static str> {
        let mut plurals = self
            .adapters
            .values()
            .map(|a| a.plural())
            .collect::<Vec<_>>();
        plurals.sort_unstable();
        plurals.dedup();
        plurals
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.plurals())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::Writers, context::Identity, namespace::NamespaceQuery, resource::fixtures::*,
    };
    use k8s_openapi::{api::core::v1::Secret, ByteString};
    use maplit::btreemap;

    #[test]
    fn resolves_aliases() {
        let registry = Registry::default();
        assert_eq!(registry.get("pods").unwrap().plural(), "pods");
        assert_eq!(registry.get("pod").unwrap().plural(), "pods");
        assert_eq!(registry.get("k8s_services").unwrap().plural(), "services");
        assert_eq!(registry.get("pvc").unwrap().plural(), "persistentvolumeclaims");
        assert_eq!(registry.get("widgets").unwrap_err().kind(), "not-found");
        assert!(registry.is_cluster_scoped("nodes"));
        assert!(!registry.is_cluster_scoped("pods"));
        assert_eq!(registry.plurals().len(), 22);
    }

    #[tokio::test]
    async fn dispatches_reads_to_assemblers() {
        let mut writers = Writers::default();
        writers.apply(pod(meta("alice", "web-1"), "Running", true));
        writers.apply(pod(meta("alice", "web-2"), "Pending", false));
        writers.apply(Secret {
            metadata: meta("alice", "creds"),
            data: Some(btreemap! {
                "password".to_string() => ByteString(b"hunter2".to_vec()),
            }),
            ..Default::default()
        });
        let ctx = context(&writers, Identity::tenant("alice", "alice"));
        let registry = Registry::default();

        let req = ListRequest::new(NamespaceQuery::one("alice"), Default::default());
        let pods = registry.get("po").unwrap().list(&ctx, &req).await.unwrap();
        assert_eq!(pods["total"], 2);

        let secret = registry
            .get("secrets")
            .unwrap()
            .get(&ctx, Some("alice"), "creds")
            .await
            .unwrap();
        assert_eq!(secret["keys"], serde_json::json!(["password"]));
        assert!(!secret.to_string().contains("hunter2"));

        let err = registry
            .get("pods")
            .unwrap()
            .get(&ctx, None, "web-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad-request");
    }
}

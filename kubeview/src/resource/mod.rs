//! List and detail assemblers for every served kind
//!
//! Every list assembler follows the same shape: open all the sources it needs on one
//! [`ResourceChannels`](crate::channels::ResourceChannels) bundle, drain them in a fixed order
//! (returning the first error), join, project each entity into a row, and hand the rows to the
//! request's [`DataSelectQuery`]. Detail assemblers fetch the entity from the cache and then open
//! a second bundle scoped to the entity's namespace.

use crate::{
    dataselect::{DataSelectQuery, Describe},
    meta::{self, ListResponse},
    namespace::NamespaceQuery,
    podinfo::{ResourceStatus, StatusCounts},
};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplateSpec};
use std::sync::Arc;

pub mod configmap;
pub mod cronjob;
pub mod daemonset;
pub mod deployment;
pub mod hpa;
pub mod ingress;
pub mod job;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod pv;
pub mod pvc;
pub mod rbac;
pub mod replicaset;
pub mod secret;
pub mod service;
pub mod statefulset;
pub mod storageclass;

/// The parameters of a list request
#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub namespaces: NamespaceQuery,
    pub query: DataSelectQuery,
    /// Restricts claims to those no pod mounts
    pub unused: Option<bool>,
    /// Restricts services to the given type
    pub service_type: Option<String>,
    /// Restricts events to those about the object with this UID
    pub involved_uid: Option<String>,
}

impl ListRequest {
    pub fn new(namespaces: NamespaceQuery, query: DataSelectQuery) -> Self {
        Self {
            namespaces,
            query,
            ..Default::default()
        }
    }
}

/// Selects rows and computes the status histogram over every row that matched the filters
pub(crate) fn select_with_status<T: Describe>(
    query: &DataSelectQuery,
    rows: impl IntoIterator<Item = T>,
    status: impl Fn(&T) -> ResourceStatus,
) -> ListResponse<T, StatusCounts> {
    let filtered = query.filter(rows);
    let counts = filtered.iter().map(status).collect::<StatusCounts>();
    ListResponse::new(filtered.select(query)).with_status(counts)
}

/// Returns the pods whose controller has the given UID
pub(crate) fn controlled_pods(pods: &[Arc<Pod>], uid: &str) -> Vec<Arc<Pod>> {
    pods.iter()
        .filter(|p| meta::controlled_by(&p.metadata, uid))
        .cloned()
        .collect()
}

pub(crate) fn container_images(spec: Option<&PodSpec>) -> Vec<String> {
    spec.iter()
        .flat_map(|s| s.containers.iter())
        .filter_map(|c| c.image.clone())
        .collect()
}

pub(crate) fn init_container_images(spec: Option<&PodSpec>) -> Vec<String> {
    spec.iter()
        .flat_map(|s| s.init_containers.iter().flatten())
        .filter_map(|c| c.image.clone())
        .collect()
}

pub(crate) fn template_spec(template: &PodTemplateSpec) -> Option<&PodSpec> {
    template.spec.as_ref()
}

pub(crate) fn uid_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    meta.uid.as_deref().unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders for cached objects used across assembler tests

    use crate::{
        admin::Readiness,
        cache::{IndexerCache, Writers},
        cluster::{Cluster, ClusterMeta},
        context::{Identity, RequestContext},
    };
    use hyper::{Request, Response};
    use k8s_openapi::{
        api::core::v1::{Pod, PodCondition, PodStatus},
        apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
    };
    use kube_client::client::Body;
    use std::{collections::BTreeMap, sync::Arc};

    pub fn meta(ns: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            uid: Some(format!("{ns}/{name}")),
            ..Default::default()
        }
    }

    pub fn labeled(mut meta: ObjectMeta, labels: &[(&str, &str)]) -> ObjectMeta {
        meta.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        meta
    }

    pub fn owned(mut meta: ObjectMeta, kind: &str, owner: &ObjectMeta) -> ObjectMeta {
        meta.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: owner.name.clone().unwrap_or_default(),
            uid: owner.uid.clone().unwrap_or_default(),
            controller: Some(true),
            ..Default::default()
        }]);
        meta
    }

    pub fn pod(meta: ObjectMeta, phase: &str, ready: bool) -> Pod {
        Pod {
            metadata: meta,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Builds a request context over a synced cache for the given identity
    pub fn context(writers: &Writers, identity: Identity) -> RequestContext {
        let cache = IndexerCache::from_writers("test", writers);
        context_over(cache, identity)
    }

    /// Builds an admin request context over a cache whose initial sync has not completed
    pub fn unsynced_context(writers: &Writers) -> RequestContext {
        let cache = IndexerCache::new("test", writers.stores(), Readiness::default());
        context_over(cache, Identity::admin("admin"))
    }

    fn context_over(cache: IndexerCache, identity: Identity) -> RequestContext {
        let cache = Arc::new(cache);
        let (mock, _handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube_client::Client::new(mock, "default");
        let cluster = Cluster::new(ClusterMeta::new("test"), cache, client);
        RequestContext::new(Arc::new(cluster), identity)
    }

    pub fn admin_context(writers: &Writers) -> RequestContext {
        context(writers, Identity::admin("admin"))
    }
}

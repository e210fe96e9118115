//! Deployments
//!
//! Pods join to a deployment through its replica sets: a replica set belongs to the deployment
//! when its controller reference names the deployment's UID, and a pod belongs to the deployment
//! when its controller is one of those replica sets. A replica set with a broken owner chain is
//! not part of any deployment.

use super::{pod::PodView, replicaset::ReplicaSetView, ListRequest, StatusCounts};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{self, ListResponse, ObjectMeta, TypeMeta},
    podinfo::{PodInfo, ResourceStatus},
    Error,
};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentStrategy, ReplicaSet},
        core::v1::{Event, Pod},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use serde::Serialize;
use std::sync::Arc;

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub status: ResourceStatus,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDetail {
    #[serde(flatten)]
    pub deployment: DeploymentView,
    pub selector: LabelSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,
    pub min_ready_seconds: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    pub status_info: ReplicaCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_replica_set: Option<ReplicaSetView>,
    pub old_replica_sets: Vec<ReplicaSetView>,
    pub pods: Vec<PodView>,
    pub events: Vec<EventView>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaCounts {
    pub replicas: i32,
    pub updated: i32,
    pub available: i32,
    pub unavailable: i32,
}

impl DeploymentView {
    pub fn new(
        deploy: &Deployment,
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Self {
        let warnings = event::derive_warnings(events, pods);
        let pods = PodInfo::new(
            deploy
                .status
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or_default(),
            deploy.spec.as_ref().and_then(|s| s.replicas),
            pods,
        )
        .with_warnings(event::views(&warnings, cluster));
        let spec = deploy
            .spec
            .as_ref()
            .and_then(|s| super::template_spec(&s.template));
        Self {
            object_meta: ObjectMeta::new(&deploy.metadata, cluster),
            type_meta: TypeMeta::of::<Deployment>(),
            status: pods.status(),
            pods,
            container_images: super::container_images(spec),
            init_container_images: super::init_container_images(spec),
        }
    }
}

impl Describe for DeploymentView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.status.as_str())
    }
}

/// Returns the replica sets a deployment controls
fn owned_replicasets(
    deploy: &Deployment,
    replicasets: &[Arc<ReplicaSet>],
) -> Vec<Arc<ReplicaSet>> {
    let uid = super::uid_of(&deploy.metadata);
    replicasets
        .iter()
        .filter(|rs| meta::controlled_by(&rs.metadata, uid))
        .cloned()
        .collect()
}

/// Returns the pods controlled by any of the given replica sets
fn pods_of(replicasets: &[Arc<ReplicaSet>], pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
    let uids = replicasets
        .iter()
        .map(|rs| super::uid_of(&rs.metadata))
        .collect::<ahash::AHashSet<_>>();
    pods.iter()
        .filter(|p| {
            meta::controller_of(&p.metadata).is_some_and(|r| uids.contains(r.uid.as_str()))
        })
        .cloned()
        .collect()
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<DeploymentView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let deployments = channels.open::<Deployment>();
    let replicasets = channels.open::<ReplicaSet>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let deployments = deployments.recv().await?;
    let replicasets = replicasets.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;
    tracing::debug!(
        deployments = deployments.len(),
        replicasets = replicasets.len(),
        pods = pods.len(),
        "joining"
    );

    let cluster = ctx.cluster_meta();
    let rows = deployments.iter().map(|d| {
        let pods = pods_of(&owned_replicasets(d, &replicasets), &pods);
        DeploymentView::new(d, &pods, &events, cluster)
    });
    Ok(super::select_with_status(&req.query, rows, |d| d.status))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<DeploymentDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let deploy = ctx.cache().get::<Deployment>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let replicasets = channels.open::<ReplicaSet>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let replicasets = replicasets.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let owned = owned_replicasets(&deploy, &replicasets);
    let all_pods = pods_of(&owned, &pods);

    let revision = deploy
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION));
    let (new, old): (Vec<_>, Vec<_>) = owned.iter().partition(|rs| {
        revision.is_some()
            && rs
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(REVISION_ANNOTATION))
                == revision
    });
    let rs_view = |rs: &Arc<ReplicaSet>| {
        let pods = super::controlled_pods(&pods, super::uid_of(&rs.metadata));
        ReplicaSetView::new(rs, &pods, &events, cluster)
    };

    let spec = deploy.spec.as_ref();
    let status = deploy.status.as_ref();
    Ok(DeploymentDetail {
        deployment: DeploymentView::new(&deploy, &all_pods, &events, cluster),
        selector: spec.map(|s| s.selector.clone()).unwrap_or_default(),
        strategy: spec.and_then(|s| s.strategy.clone()),
        min_ready_seconds: spec.and_then(|s| s.min_ready_seconds).unwrap_or_default(),
        revision_history_limit: spec.and_then(|s| s.revision_history_limit),
        status_info: ReplicaCounts {
            replicas: status.and_then(|s| s.replicas).unwrap_or_default(),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or_default(),
            available: status.and_then(|s| s.available_replicas).unwrap_or_default(),
            unavailable: status
                .and_then(|s| s.unavailable_replicas)
                .unwrap_or_default(),
        },
        new_replica_set: new.first().map(|&rs| rs_view(rs)),
        old_replica_sets: old.iter().map(|&rs| rs_view(rs)).collect(),
        pods: PodView::with_warnings(&all_pods, &events, cluster),
        events: event::views(
            &event::events_for(&events, super::uid_of(&deploy.metadata)),
            cluster,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::Writers,
        dataselect::DataSelectQuery,
        namespace::NamespaceQuery,
        resource::fixtures::*,
    };
    use k8s_openapi::api::apps::v1::{
        DeploymentSpec, DeploymentStatus, ReplicaSetSpec, ReplicaSetStatus,
    };

    fn deployment(name: &str, desired: i32, current: i32) -> Deployment {
        Deployment {
            metadata: meta("ns", name),
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(current),
                ..Default::default()
            }),
        }
    }

    fn replicaset(name: &str, owner: &Deployment, replicas: i32) -> ReplicaSet {
        ReplicaSet {
            metadata: owned(meta("ns", name), "Deployment", &owner.metadata),
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(ReplicaSetStatus {
                replicas,
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn joins_pods_through_replicasets() {
        let web = deployment("web", 3, 3);
        let rs = replicaset("web-v2", &web, 3);
        let mut writers = Writers::default();
        for (name, phase, ready) in [
            ("web-v2-a", "Running", true),
            ("web-v2-b", "Running", true),
            ("web-v2-c", "Pending", false),
        ] {
            writers.apply(pod(owned(meta("ns", name), "ReplicaSet", &rs.metadata), phase, ready));
        }
        // Orphaned replica set and its pod are not part of the deployment.
        let orphan = ReplicaSet {
            metadata: meta("ns", "web-v1"),
            ..Default::default()
        };
        let orphaned = owned(meta("ns", "web-v1-a"), "ReplicaSet", &orphan.metadata);
        writers.apply(pod(orphaned, "Running", true));
        writers.apply(orphan);
        writers.apply(rs);
        writers.apply(web);
        let ctx = admin_context(&writers);

        let rsp = list(
            &ctx,
            &ListRequest::new(NamespaceQuery::one("ns"), DataSelectQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(rsp.total, 1);
        let row = &rsp.items[0];
        assert_eq!(row.object_meta.name, "web");
        assert_eq!(
            row.pods,
            PodInfo {
                current: 3,
                desired: Some(3),
                running: 2,
                pending: 1,
                failed: 0,
                succeeded: 0,
                warnings: vec![],
            }
        );
        assert_eq!(row.status, ResourceStatus::Pending);
        assert_eq!(rsp.status.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unsynced_caches_fail_the_whole_list() {
        let web = deployment("web", 1, 1);
        let rs = replicaset("web-v1", &web, 1);
        let mut writers = Writers::default();
        let owner = &rs.metadata;
        writers.apply(pod(owned(meta("ns", "web-v1-a"), "ReplicaSet", owner), "Running", true));
        writers.apply(rs);
        writers.apply(web);
        let ctx = unsynced_context(&writers);

        let err = list(
            &ctx,
            &ListRequest::new(NamespaceQuery::one("ns"), DataSelectQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err, Error::ServiceUnavailable("test".to_string()));
        assert_eq!(err.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);
    }
}

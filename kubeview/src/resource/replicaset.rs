//! Replica sets

use super::{pod::PodView, ListRequest, StatusCounts};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    podinfo::{PodInfo, ResourceStatus},
    Error,
};
use k8s_openapi::api::{
    apps::v1::ReplicaSet,
    core::v1::{Event, Pod},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub status: ResourceStatus,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetDetail {
    #[serde(flatten)]
    pub replica_set: ReplicaSetView,
    pub pods: Vec<PodView>,
    pub events: Vec<EventView>,
}

impl ReplicaSetView {
    /// Builds a row from the pods the replica set controls
    pub fn new(
        rs: &ReplicaSet,
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Self {
        let warnings = event::derive_warnings(events, pods);
        let pods = PodInfo::new(
            rs.status.as_ref().map(|s| s.replicas).unwrap_or_default(),
            rs.spec.as_ref().and_then(|s| s.replicas),
            pods,
        )
        .with_warnings(event::views(&warnings, cluster));
        let template = rs.spec.as_ref().and_then(|s| s.template.as_ref());
        let spec = template.and_then(super::template_spec);
        Self {
            object_meta: ObjectMeta::new(&rs.metadata, cluster),
            type_meta: TypeMeta::of::<ReplicaSet>(),
            status: pods.status(),
            pods,
            container_images: super::container_images(spec),
            init_container_images: super::init_container_images(spec),
        }
    }
}

impl Describe for ReplicaSetView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.status.as_str())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<ReplicaSetView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let replicasets = channels.open::<ReplicaSet>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let replicasets = replicasets.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = replicasets.iter().map(|rs| {
        let pods = super::controlled_pods(&pods, super::uid_of(&rs.metadata));
        ReplicaSetView::new(rs, &pods, &events, cluster)
    });
    Ok(super::select_with_status(&req.query, rows, |r| r.status))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<ReplicaSetDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let rs = ctx.cache().get::<ReplicaSet>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let uid = super::uid_of(&rs.metadata);
    let pods = super::controlled_pods(&pods, uid);
    Ok(ReplicaSetDetail {
        replica_set: ReplicaSetView::new(&rs, &pods, &events, cluster),
        pods: PodView::with_warnings(&pods, &events, cluster),
        events: event::views(&event::events_for(&events, uid), cluster),
    })
}

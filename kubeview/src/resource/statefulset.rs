//! Stateful sets

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
    apps::v1::StatefulSet,
    core::v1::{Event, Pod},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub status: ResourceStatus,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetDetail {
    #[serde(flatten)]
    pub stateful_set: StatefulSetView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub pods: Vec<PodView>,
    pub events: Vec<EventView>,
}

impl StatefulSetView {
    /// Current replicas come from the status; desired replicas from the spec
    pub fn new(
        sts: &StatefulSet,
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Self {
        let warnings = event::derive_warnings(events, pods);
        let pods = PodInfo::new(
            sts.status.as_ref().map(|s| s.replicas).unwrap_or_default(),
            sts.spec.as_ref().and_then(|s| s.replicas),
            pods,
        )
        .with_warnings(event::views(&warnings, cluster));
        let spec = sts
            .spec
            .as_ref()
            .and_then(|s| super::template_spec(&s.template));
        Self {
            object_meta: ObjectMeta::new(&sts.metadata, cluster),
            type_meta: TypeMeta::of::<StatefulSet>(),
            status: pods.status(),
            pods,
            container_images: super::container_images(spec),
            init_container_images: super::init_container_images(spec),
        }
    }
}

impl Describe for StatefulSetView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.status.as_str())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<StatefulSetView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let statefulsets = channels.open::<StatefulSet>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let statefulsets = statefulsets.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = statefulsets.iter().map(|sts| {
        let pods = super::controlled_pods(&pods, super::uid_of(&sts.metadata));
        StatefulSetView::new(sts, &pods, &events, cluster)
    });
    Ok(super::select_with_status(&req.query, rows, |s| s.status))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<StatefulSetDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let sts = ctx.cache().get::<StatefulSet>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let uid = super::uid_of(&sts.metadata);
    let pods = super::controlled_pods(&pods, uid);
    Ok(StatefulSetDetail {
        stateful_set: StatefulSetView::new(&sts, &pods, &events, cluster),
        service_name: sts.spec.as_ref().and_then(|s| s.service_name.clone()),
        pods: PodView::with_warnings(&pods, &events, cluster),
        events: event::views(&event::events_for(&events, uid), cluster),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::Writers, resource::fixtures::*};
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};

    #[tokio::test]
    async fn detail_lists_controlled_pods() {
        let sts = StatefulSet {
            metadata: meta("ns", "db"),
            spec: Some(StatefulSetSpec {
                replicas: Some(2),
                service_name: Some("db".to_string()),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas: 2,
                ..Default::default()
            }),
        };
        let mut writers = Writers::default();
        for (name, phase, ready) in [("db-0", "Running", true), ("db-1", "Failed", false)] {
            writers.apply(pod(owned(meta("ns", name), "StatefulSet", &sts.metadata), phase, ready));
        }
        writers.apply(pod(meta("ns", "other"), "Running", true));
        writers.apply(sts);
        let ctx = admin_context(&writers);

        let detail = get(&ctx, "ns", "db").await.unwrap();
        assert_eq!(detail.pods.len(), 2);
        assert_eq!(detail.stateful_set.pods.failed, 1);
        assert_eq!(detail.stateful_set.status, ResourceStatus::Failed);
        assert_eq!(detail.service_name.as_deref(), Some("db"));

        let missing = get(&ctx, "ns", "nope").await.unwrap_err();
        assert_eq!(missing.kind(), "not-found");
    }
}

//! Daemon sets

use super::{pod::PodView, service::ServiceView, ListRequest, StatusCounts};
use crate::{
    cache::Selector,
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    podinfo::{PodInfo, ResourceStatus},
    Error,
};
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Event, Pod, Service},
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub status: ResourceStatus,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetDetail {
    #[serde(flatten)]
    pub daemon_set: DaemonSetView,
    pub pods: Vec<PodView>,
    /// Services whose selector matches the daemon set's pod template
    pub services: Vec<ServiceView>,
    pub events: Vec<EventView>,
}

impl DaemonSetView {
    /// Current and desired counts are the scheduled and desired-scheduled node counts
    pub fn new(
        ds: &DaemonSet,
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Self {
        let warnings = event::derive_warnings(events, pods);
        let status = ds.status.as_ref();
        let pods = PodInfo::new(
            status
                .map(|s| s.current_number_scheduled)
                .unwrap_or_default(),
            status.map(|s| s.desired_number_scheduled),
            pods,
        )
        .with_warnings(event::views(&warnings, cluster));
        let spec = ds
            .spec
            .as_ref()
            .and_then(|s| super::template_spec(&s.template));
        Self {
            object_meta: ObjectMeta::new(&ds.metadata, cluster),
            type_meta: TypeMeta::of::<DaemonSet>(),
            status: pods.status(),
            pods,
            container_images: super::container_images(spec),
            init_container_images: super::init_container_images(spec),
        }
    }
}

impl Describe for DaemonSetView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.status.as_str())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<DaemonSetView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let daemonsets = channels.open::<DaemonSet>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let daemonsets = daemonsets.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = daemonsets.iter().map(|ds| {
        let pods = super::controlled_pods(&pods, super::uid_of(&ds.metadata));
        DaemonSetView::new(ds, &pods, &events, cluster)
    });
    Ok(super::select_with_status(&req.query, rows, |d| d.status))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<DaemonSetDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let ds = ctx.cache().get::<DaemonSet>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let pods = channels.open::<Pod>();
    let services = channels.open::<Service>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let services = services.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let uid = super::uid_of(&ds.metadata);
    let pods = super::controlled_pods(&pods, uid);
    let template_labels = ds
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref());
    let services = services
        .iter()
        .filter(|svc| {
            svc.spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .filter(|sel| !sel.is_empty())
                .is_some_and(|sel| Selector::from_labels(sel).matches(template_labels))
        })
        .map(|svc| ServiceView::new(svc, cluster))
        .collect();

    Ok(DaemonSetDetail {
        daemon_set: DaemonSetView::new(&ds, &pods, &events, cluster),
        pods: PodView::with_warnings(&pods, &events, cluster),
        services,
        events: event::views(&event::events_for(&events, uid), cluster),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::Writers, resource::fixtures::*};
    use k8s_openapi::api::{
        apps::v1::{DaemonSetSpec, DaemonSetStatus},
        core::v1::{PodTemplateSpec, ServiceSpec},
    };
    use maplit::btreemap;

    #[tokio::test]
    async fn detail_includes_matching_services() {
        let ds = DaemonSet {
            metadata: meta("ns", "agent"),
            spec: Some(DaemonSetSpec {
                template: PodTemplateSpec {
                    metadata: Some(labeled(meta("ns", ""), &[("app", "agent"), ("tier", "node")])),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DaemonSetStatus {
                current_number_scheduled: 1,
                desired_number_scheduled: 2,
                ..Default::default()
            }),
        };
        let service = |name: &str, app: &str| Service {
            metadata: meta("ns", name),
            spec: Some(ServiceSpec {
                selector: Some(btreemap! { "app".to_string() => app.to_string() }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut writers = Writers::default();
        writers.apply(pod(
            owned(meta("ns", "agent-a"), "DaemonSet", &ds.metadata),
            "Running",
            true,
        ));
        writers.apply(service("agent-metrics", "agent"));
        writers.apply(service("web", "web"));
        writers.apply(Service {
            metadata: meta("ns", "headless"),
            ..Default::default()
        });
        writers.apply(ds);
        let ctx = admin_context(&writers);

        let detail = get(&ctx, "ns", "agent").await.unwrap();
        let names = detail
            .services
            .iter()
            .map(|s| s.object_meta.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["agent-metrics"]);
        assert_eq!(detail.daemon_set.pods.desired, Some(2));
        // One of two desired pods is running.
        assert_eq!(detail.daemon_set.status, ResourceStatus::Pending);
    }
}

//! Jobs
//!
//! Jobs find their pods by label rather than by owner reference: a pod belongs to a job when
//! both are in the same namespace and the pod's `controller-uid` label equals the one in the
//! job's selector.

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
    batch::v1::Job,
    core::v1::{Event, Pod},
};
use serde::Serialize;
use std::sync::Arc;

const CONTROLLER_UID_LABELS: [&str; 2] = ["controller-uid", "batch.kubernetes.io/controller-uid"];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<i32>,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: JobView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    pub pods: Vec<PodView>,
    pub events: Vec<EventView>,
}

impl JobView {
    /// Current pods are the active ones; desired pods are the requested completions
    pub fn new(
        job: &Job,
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Self {
        let warnings = event::derive_warnings(events, pods);
        let spec = job.spec.as_ref();
        let pods = PodInfo::new(
            job.status
                .as_ref()
                .and_then(|s| s.active)
                .unwrap_or_default(),
            spec.and_then(|s| s.completions),
            pods,
        )
        .with_warnings(event::views(&warnings, cluster));
        let pod_spec = spec.and_then(|s| super::template_spec(&s.template));
        Self {
            object_meta: ObjectMeta::new(&job.metadata, cluster),
            type_meta: TypeMeta::of::<Job>(),
            status: pods.status(),
            pods,
            parallelism: spec.and_then(|s| s.parallelism),
            container_images: super::container_images(pod_spec),
            init_container_images: super::init_container_images(pod_spec),
        }
    }
}

impl Describe for JobView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.status.as_str())
    }
}

/// Returns the controller UID a job selects its pods by
///
/// Falls back to the job's own UID when the selector does not carry one.
fn controller_uid(job: &Job) -> &str {
    let labels = job
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .and_then(|s| s.match_labels.as_ref());
    CONTROLLER_UID_LABELS
        .iter()
        .find_map(|k| labels.and_then(|l| l.get(*k)))
        .map(String::as_str)
        .unwrap_or_else(|| super::uid_of(&job.metadata))
}

/// Returns the pods belonging to `job`
pub fn job_pods(job: &Job, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
    let uid = controller_uid(job);
    if uid.is_empty() {
        return Vec::new();
    }
    pods.iter()
        .filter(|p| p.metadata.namespace == job.metadata.namespace)
        .filter(|p| {
            let labels = p.metadata.labels.as_ref();
            CONTROLLER_UID_LABELS
                .iter()
                .any(|k| labels.and_then(|l| l.get(*k)).map(String::as_str) == Some(uid))
        })
        .cloned()
        .collect()
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<JobView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let jobs = channels.open::<Job>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let jobs = jobs.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = jobs
        .iter()
        .map(|job| JobView::new(job, &job_pods(job, &pods), &events, cluster));
    Ok(super::select_with_status(&req.query, rows, |j| j.status))
}

pub async fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<JobDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let job = ctx.cache().get::<Job>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let pods = job_pods(&job, &pods);
    let spec = job.spec.as_ref();
    Ok(JobDetail {
        job: JobView::new(&job, &pods, &events, cluster),
        completions: spec.and_then(|s| s.completions),
        backoff_limit: spec.and_then(|s| s.backoff_limit),
        pods: PodView::with_warnings(&pods, &events, cluster),
        events: event::views(
            &event::events_for(&events, super::uid_of(&job.metadata)),
            cluster,
        ),
    })
}

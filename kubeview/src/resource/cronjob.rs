//! Cron jobs

use super::{
    job::{self, JobView},
    ListRequest,
};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{self, ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::{
    api::{
        batch::v1::{CronJob, Job},
        core::v1::{Event, Pod},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub schedule: String,
    pub suspend: bool,
    pub active: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_schedule: Option<Time>,
    pub container_images: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobDetail {
    #[serde(flatten)]
    pub cron_job: CronJobView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<String>,
    pub active_jobs: Vec<JobView>,
    pub inactive_jobs: Vec<JobView>,
    pub events: Vec<EventView>,
}

impl CronJobView {
    pub fn new(cj: &CronJob, cluster: &ClusterMeta) -> Self {
        let spec = cj.spec.as_ref();
        let pod_spec = spec
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|s| super::template_spec(&s.template));
        Self {
            object_meta: ObjectMeta::new(&cj.metadata, cluster),
            type_meta: TypeMeta::of::<CronJob>(),
            schedule: spec.map(|s| s.schedule.clone()).unwrap_or_default(),
            suspend: spec.and_then(|s| s.suspend).unwrap_or(false),
            active: cj
                .status
                .as_ref()
                .and_then(|s| s.active.as_ref())
                .map_or(0, Vec::len),
            last_schedule: cj.status.as_ref().and_then(|s| s.last_schedule_time.clone()),
            container_images: super::container_images(pod_spec),
        }
    }
}

impl Describe for CronJobView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

/// Returns the jobs owned by the cron job
fn owned_jobs(cj: &CronJob, jobs: &[Arc<Job>]) -> Vec<Arc<Job>> {
    let uid = super::uid_of(&cj.metadata);
    jobs.iter()
        .filter(|j| meta::owned_by(&j.metadata, uid))
        .cloned()
        .collect()
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<CronJobView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let cronjobs = channels.open::<CronJob>();
    let cronjobs = cronjobs.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = cronjobs.iter().map(|cj| CronJobView::new(cj, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<CronJobDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let cj = ctx.cache().get::<CronJob>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let jobs = channels.open::<Job>();
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let jobs = jobs.recv().await?;
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let active = cj
        .status
        .iter()
        .flat_map(|s| s.active.iter().flatten())
        .filter_map(|r| r.uid.as_deref())
        .collect::<ahash::AHashSet<_>>();
    let (active_jobs, inactive_jobs): (Vec<_>, Vec<_>) = owned_jobs(&cj, &jobs)
        .iter()
        .map(|j| JobView::new(j, &job::job_pods(j, &pods), &events, cluster))
        .partition(|j| active.contains(j.object_meta.uid.as_str()));

    Ok(CronJobDetail {
        cron_job: CronJobView::new(&cj, cluster),
        concurrency_policy: cj.spec.as_ref().and_then(|s| s.concurrency_policy.clone()),
        active_jobs,
        inactive_jobs,
        events: event::views(
            &event::events_for(&events, super::uid_of(&cj.metadata)),
            cluster,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::Writers, resource::fixtures::*};
    use k8s_openapi::api::{
        batch::v1::{CronJobSpec, CronJobStatus},
        core::v1::ObjectReference,
    };

    #[tokio::test]
    async fn splits_active_and_inactive_jobs() {
        let cj = CronJob {
            metadata: meta("ns", "nightly"),
            spec: Some(CronJobSpec {
                schedule: "0 0 * * *".to_string(),
                ..Default::default()
            }),
            status: Some(CronJobStatus {
                active: Some(vec![ObjectReference {
                    uid: Some("ns/nightly-2".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };
        let mut writers = Writers::default();
        for name in ["nightly-1", "nightly-2"] {
            writers.apply(Job {
                metadata: owned(meta("ns", name), "CronJob", &cj.metadata),
                ..Default::default()
            });
        }
        writers.apply(Job {
            metadata: meta("ns", "adhoc"),
            ..Default::default()
        });
        writers.apply(cj);
        let ctx = admin_context(&writers);

        let detail = get(&ctx, "ns", "nightly").await.unwrap();
        assert_eq!(detail.cron_job.active, 1);
        let names = |jobs: &[JobView]| {
            jobs.iter()
                .map(|j| j.object_meta.name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&detail.active_jobs), ["nightly-2"]);
        assert_eq!(names(&detail.inactive_jobs), ["nightly-1"]);
    }
}

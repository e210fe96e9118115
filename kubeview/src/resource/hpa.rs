//! Horizontal pod autoscalers

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerCondition,
    MetricSpec,
};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub scale_target_ref: CrossVersionObjectReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    pub current_replicas: i32,
    pub desired_replicas: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerDetail {
    #[serde(flatten)]
    pub autoscaler: AutoscalerView,
    pub metrics: Vec<MetricSpec>,
    pub conditions: Vec<HorizontalPodAutoscalerCondition>,
}

impl AutoscalerView {
    pub fn new(hpa: &HorizontalPodAutoscaler, cluster: &ClusterMeta) -> Self {
        let spec = hpa.spec.as_ref();
        let status = hpa.status.as_ref();
        Self {
            object_meta: ObjectMeta::new(&hpa.metadata, cluster),
            type_meta: TypeMeta::of::<HorizontalPodAutoscaler>(),
            scale_target_ref: spec.map(|s| s.scale_target_ref.clone()).unwrap_or_default(),
            min_replicas: spec.and_then(|s| s.min_replicas),
            max_replicas: spec.map(|s| s.max_replicas).unwrap_or_default(),
            current_replicas: status.and_then(|s| s.current_replicas).unwrap_or_default(),
            desired_replicas: status.map(|s| s.desired_replicas).unwrap_or_default(),
        }
    }
}

impl Describe for AutoscalerView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<AutoscalerView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let hpas = channels.open::<HorizontalPodAutoscaler>();
    let hpas = hpas.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = hpas.iter().map(|h| AutoscalerView::new(h, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<AutoscalerDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let hpa = ctx.cache().get::<HorizontalPodAutoscaler>(Some(namespace), name)?;
    Ok(AutoscalerDetail {
        autoscaler: AutoscalerView::new(&hpa, ctx.cluster_meta()),
        metrics: hpa
            .spec
            .as_ref()
            .and_then(|s| s.metrics.clone())
            .unwrap_or_default(),
        conditions: hpa
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default(),
    })
}

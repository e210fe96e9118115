//! Persistent volumes

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::{
    api::core::v1::PersistentVolume, apimachinery::pkg::api::resource::Quantity,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub status: String,
    /// The bound claim as `namespace/name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub capacity: BTreeMap<String, Quantity>,
    pub access_modes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDetail {
    #[serde(flatten)]
    pub volume: VolumeView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub mount_options: Vec<String>,
}

impl VolumeView {
    pub fn new(pv: &PersistentVolume, cluster: &ClusterMeta) -> Self {
        let spec = pv.spec.as_ref();
        let status = pv.status.as_ref();
        Self {
            object_meta: ObjectMeta::new(&pv.metadata, cluster),
            type_meta: TypeMeta::of::<PersistentVolume>(),
            status: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Pending".to_string()),
            claim: spec.and_then(|s| s.claim_ref.as_ref()).map(|r| {
                format!(
                    "{}/{}",
                    r.namespace.as_deref().unwrap_or_default(),
                    r.name.as_deref().unwrap_or_default()
                )
            }),
            storage_class: spec.and_then(|s| s.storage_class_name.clone()),
            capacity: spec.and_then(|s| s.capacity.clone()).unwrap_or_default(),
            access_modes: spec.and_then(|s| s.access_modes.clone()).unwrap_or_default(),
            reclaim_policy: spec.and_then(|s| s.persistent_volume_reclaim_policy.clone()),
            reason: status.and_then(|s| s.reason.clone()),
        }
    }
}

impl Describe for VolumeView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
            .with(Property::Status, self.status.as_str())
            .with_opt(Property::StorageClass, self.storage_class.as_deref())
            .with_opt(Property::Reason, self.reason.as_deref())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<VolumeView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let volumes = channels.open::<PersistentVolume>();
    let volumes = volumes.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = volumes.iter().map(|pv| VolumeView::new(pv, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub fn get(ctx: &RequestContext, name: &str) -> Result<VolumeDetail, Error> {
    let pv = ctx.cache().get::<PersistentVolume>(None, name)?;
    Ok(VolumeDetail {
        volume: VolumeView::new(&pv, ctx.cluster_meta()),
        message: pv.status.as_ref().and_then(|s| s.message.clone()),
        mount_options: pv
            .spec
            .as_ref()
            .and_then(|s| s.mount_options.clone())
            .unwrap_or_default(),
    })
}

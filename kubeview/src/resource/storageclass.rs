//! Storage classes

use super::{pv::VolumeView, ListRequest};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::{core::v1::PersistentVolume, storage::v1::StorageClass};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub provisioner: String,
    pub parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassDetail {
    #[serde(flatten)]
    pub storage_class: StorageClassView,
    /// Volumes provisioned from this class
    pub persistent_volumes: Vec<VolumeView>,
}

impl StorageClassView {
    pub fn new(sc: &StorageClass, cluster: &ClusterMeta) -> Self {
        Self {
            object_meta: ObjectMeta::new(&sc.metadata, cluster),
            type_meta: TypeMeta::of::<StorageClass>(),
            provisioner: sc.provisioner.clone(),
            parameters: sc.parameters.clone().unwrap_or_default(),
            reclaim_policy: sc.reclaim_policy.clone(),
        }
    }
}

impl Describe for StorageClassView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<StorageClassView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let classes = channels.open::<StorageClass>();
    let classes = classes.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = classes.iter().map(|sc| StorageClassView::new(sc, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub async fn get(ctx: &RequestContext, name: &str) -> Result<StorageClassDetail, Error> {
    let sc = ctx.cache().get::<StorageClass>(None, name)?;

    let channels = ctx.channels(Default::default());
    let volumes = channels.open::<PersistentVolume>();
    let volumes = volumes.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    Ok(StorageClassDetail {
        storage_class: StorageClassView::new(&sc, cluster),
        persistent_volumes: volumes
            .iter()
            .filter(|pv| {
                pv.spec.as_ref().and_then(|s| s.storage_class_name.as_deref())
                    == sc.metadata.name.as_deref()
            })
            .map(|pv| VolumeView::new(pv, cluster))
            .collect(),
    })
}

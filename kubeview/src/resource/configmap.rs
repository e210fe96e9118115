//! Config maps

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::core::v1::ConfigMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapDetail {
    #[serde(flatten)]
    pub config_map: ConfigMapView,
    pub data: BTreeMap<String, String>,
    /// Binary keys; values are not returned
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binary_keys: Vec<String>,
}

impl ConfigMapView {
    pub fn new(cm: &ConfigMap, cluster: &ClusterMeta) -> Self {
        Self {
            object_meta: ObjectMeta::new(&cm.metadata, cluster),
            type_meta: TypeMeta::of::<ConfigMap>(),
        }
    }
}

impl Describe for ConfigMapView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<ConfigMapView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let configmaps = channels.open::<ConfigMap>();
    let configmaps = configmaps.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = configmaps.iter().map(|cm| ConfigMapView::new(cm, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<ConfigMapDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let cm = ctx.cache().get::<ConfigMap>(Some(namespace), name)?;
    Ok(ConfigMapDetail {
        config_map: ConfigMapView::new(&cm, ctx.cluster_meta()),
        data: cm.data.clone().unwrap_or_default(),
        binary_keys: cm.binary_data.iter().flatten().map(|(k, _)| k.clone()).collect(),
    })
}

//! Persistent volume claims
//!
//! A claim is mounted by the pods in its namespace whose volumes name it; a claim no pod mounts
//! is unused.

use super::{pod, ListRequest};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::{
    api::core::v1::{Event, PersistentVolumeClaim, Pod},
    apimachinery::pkg::api::resource::Quantity,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    pub capacity: BTreeMap<String, Quantity>,
    pub access_modes: Vec<String>,
    pub mounted_by: Vec<String>,
    pub unused: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDetail {
    #[serde(flatten)]
    pub claim: ClaimView,
    pub events: Vec<EventView>,
}

impl ClaimView {
    pub fn new(pvc: &PersistentVolumeClaim, pods: &[Arc<Pod>], cluster: &ClusterMeta) -> Self {
        let name = pvc.metadata.name.as_deref().unwrap_or_default();
        let mounted_by = pods
            .iter()
            .filter(|p| p.metadata.namespace == pvc.metadata.namespace)
            .filter(|p| pod::claim_names(p).any(|c| c == name))
            .filter_map(|p| p.metadata.name.clone())
            .collect::<Vec<_>>();
        let spec = pvc.spec.as_ref();
        let status = pvc.status.as_ref();
        Self {
            object_meta: ObjectMeta::new(&pvc.metadata, cluster),
            type_meta: TypeMeta::of::<PersistentVolumeClaim>(),
            status: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Pending".to_string()),
            volume: spec.and_then(|s| s.volume_name.clone()),
            storage_class: spec.and_then(|s| s.storage_class_name.clone()),
            capacity: status.and_then(|s| s.capacity.clone()).unwrap_or_default(),
            access_modes: spec.and_then(|s| s.access_modes.clone()).unwrap_or_default(),
            unused: mounted_by.is_empty(),
            mounted_by,
        }
    }
}

impl Describe for ClaimView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
            .with(Property::Status, self.status.as_str())
            .with(Property::Unused, self.unused)
            .with_opt(Property::StorageClass, self.storage_class.as_deref())
    }
}

/// Lists claims with the pods mounting them, optionally keeping only claims that are or are not
/// in use
pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<ClaimView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let claims = channels.open::<PersistentVolumeClaim>();
    let pods = channels.open::<Pod>();
    let claims = claims.recv().await?;
    let pods = pods.recv().await?;
    channels.close().await;

    let query = match req.unused {
        Some(unused) => req.query.clone().with_filter(Property::Unused, unused.to_string()),
        None => req.query.clone(),
    };
    let cluster = ctx.cluster_meta();
    let rows = claims.iter().map(|c| ClaimView::new(c, &pods, cluster));
    Ok(ListResponse::new(query.select(rows)))
}

pub async fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<ClaimDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let pvc = ctx.cache().get::<PersistentVolumeClaim>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    Ok(ClaimDetail {
        claim: ClaimView::new(&pvc, &pods, cluster),
        events: event::views(
            &event::events_for(&events, super::uid_of(&pvc.metadata)),
            cluster,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::Writers, dataselect::DataSelectQuery, namespace::NamespaceQuery,
        resource::fixtures::*,
    };
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, PodSpec, Volume};

    fn mounting(mut p: Pod, claim: &str) -> Pod {
        p.spec = Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "data".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        p
    }

    #[tokio::test]
    async fn unused_filter_keeps_unmounted_claims() {
        let mut writers = Writers::default();
        for name in ["data-a", "data-b", "data-c"] {
            writers.apply(PersistentVolumeClaim {
                metadata: meta("ns", name),
                ..Default::default()
            });
        }
        writers.apply(mounting(pod(meta("ns", "app"), "Running", true), "data-a"));
        // Same claim name in another namespace does not count.
        writers.apply(mounting(pod(meta("other", "app"), "Running", true), "data-b"));
        let ctx = admin_context(&writers);

        let mut req = ListRequest::new(NamespaceQuery::one("ns"), DataSelectQuery::default());
        req.unused = Some(true);
        let rsp = list(&ctx, &req).await.unwrap();
        let mut names = rsp
            .items
            .iter()
            .map(|c| c.object_meta.name.as_str())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["data-b", "data-c"]);
        assert_eq!(rsp.total, 2);

        let detail = get(&ctx, "ns", "data-a").await.unwrap();
        assert_eq!(detail.claim.mounted_by, ["app"]);
        assert!(!detail.claim.unused);
    }
}

//! Namespaces
//!
//! Namespaces are cluster-scoped, so tenant visibility applies to their names rather than to the
//! namespace they live in.

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::core::v1::{
    Event, LimitRange, LimitRangeItem, Namespace, ResourceQuota, ResourceQuotaStatus,
};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub phase: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceDetail {
    #[serde(flatten)]
    pub namespace: NamespaceView,
    pub resource_quotas: Vec<QuotaView>,
    pub limit_ranges: Vec<LimitRangeView>,
    pub events: Vec<EventView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaView {
    pub object_meta: ObjectMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceQuotaStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRangeView {
    pub object_meta: ObjectMeta,
    pub limits: Vec<LimitRangeItem>,
}

impl NamespaceView {
    pub fn new(ns: &Namespace, cluster: &ClusterMeta) -> Self {
        Self {
            object_meta: ObjectMeta::new(&ns.metadata, cluster),
            type_meta: TypeMeta::of::<Namespace>(),
            phase: ns
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Active".to_string()),
        }
    }
}

impl Describe for NamespaceView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Phase, self.phase.as_str())
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<NamespaceView>, Error> {
    let channels = ctx.channels(Default::default());
    let namespaces = channels.open::<Namespace>();
    let namespaces = namespaces.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = namespaces
        .iter()
        .filter(|ns| req.namespaces.matches(ns.metadata.name.as_deref()))
        .map(|ns| NamespaceView::new(ns, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub async fn get(ctx: &RequestContext, name: &str) -> Result<NamespaceDetail, Error> {
    ctx.authorize_namespace(name)?;
    let ns = ctx.cache().get::<Namespace>(None, name)?;

    let channels = ctx.channels_in(name);
    let quotas = channels.open::<ResourceQuota>();
    let limits = channels.open::<LimitRange>();
    let events = channels.open::<Event>();
    let quotas = quotas.recv().await?;
    let limits = limits.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    Ok(NamespaceDetail {
        namespace: NamespaceView::new(&ns, cluster),
        resource_quotas: quotas
            .iter()
            .map(|q| QuotaView {
                object_meta: ObjectMeta::new(&q.metadata, cluster),
                status: q.status.clone(),
            })
            .collect(),
        limit_ranges: limits
            .iter()
            .map(|l| LimitRangeView {
                object_meta: ObjectMeta::new(&l.metadata, cluster),
                limits: l.spec.as_ref().map(|s| s.limits.clone()).unwrap_or_default(),
            })
            .collect(),
        events: event::views(&events, cluster),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::Writers,
        context::Identity,
        dataselect::DataSelectQuery,
        namespace::{NamespaceParams, NamespaceQuery},
        resource::fixtures::*,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sMeta;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: K8sMeta {
                name: Some(name.to_string()),
                uid: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tenants_list_only_their_namespaces() {
        let mut writers = Writers::default();
        for name in ["alice", "bob", "kube-system"] {
            writers.apply(namespace(name));
        }
        writers.apply(ResourceQuota {
            metadata: meta("alice", "quota"),
            ..Default::default()
        });
        let identity = Identity::tenant("alice", "alice");
        let ctx = context(&writers, identity.clone());

        let namespaces =
            NamespaceQuery::from_request(&NamespaceParams::default(), &identity).unwrap();
        let rsp = list(&ctx, &ListRequest::new(namespaces, DataSelectQuery::default()))
            .await
            .unwrap();
        assert_eq!(rsp.total, 1);
        assert_eq!(rsp.items[0].object_meta.name, "alice");

        let detail = get(&ctx, "alice").await.unwrap();
        assert_eq!(detail.resource_quotas.len(), 1);
        assert_eq!(get(&ctx, "bob").await.unwrap_err().kind(), "forbidden");
    }
}

//! Ingresses

use super::ListRequest;
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::{
    core::v1::Event,
    networking::v1::{Ingress, IngressBackend, IngressRule, IngressTLS},
};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    pub hosts: Vec<String>,
    pub endpoints: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressDetail {
    #[serde(flatten)]
    pub ingress: IngressView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<IngressBackend>,
    pub rules: Vec<IngressRule>,
    pub tls: Vec<IngressTLS>,
    pub events: Vec<EventView>,
}

impl IngressView {
    pub fn new(ing: &Ingress, cluster: &ClusterMeta) -> Self {
        let spec = ing.spec.as_ref();
        let mut hosts = spec
            .iter()
            .flat_map(|s| s.rules.iter().flatten())
            .filter_map(|r| r.host.clone())
            .collect::<Vec<_>>();
        hosts.dedup();
        Self {
            object_meta: ObjectMeta::new(&ing.metadata, cluster),
            type_meta: TypeMeta::of::<Ingress>(),
            ingress_class_name: spec.and_then(|s| s.ingress_class_name.clone()),
            hosts,
            endpoints: ing
                .status
                .iter()
                .filter_map(|s| s.load_balancer.as_ref())
                .flat_map(|lb| lb.ingress.iter().flatten())
                .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
                .collect(),
        }
    }
}

impl Describe for IngressView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
    }
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<IngressView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let ingresses = channels.open::<Ingress>();
    let ingresses = ingresses.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = ingresses.iter().map(|i| IngressView::new(i, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<IngressDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let ing = ctx.cache().get::<Ingress>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let events = channels.open::<Event>();
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let spec = ing.spec.as_ref();
    Ok(IngressDetail {
        ingress: IngressView::new(&ing, cluster),
        default_backend: spec.and_then(|s| s.default_backend.clone()),
        rules: spec.and_then(|s| s.rules.clone()).unwrap_or_default(),
        tls: spec.and_then(|s| s.tls.clone()).unwrap_or_default(),
        events: event::views(
            &event::events_for(&events, super::uid_of(&ing.metadata)),
            cluster,
        ),
    })
}

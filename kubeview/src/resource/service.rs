//! Services

use super::{pod::PodView, ListRequest};
use crate::{
    cache::Selector,
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::api::core::v1::{EndpointPort, Endpoints, Event, Pod, Service, ServicePort};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
    pub selector: BTreeMap<String, String>,
    pub external_endpoints: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetail {
    #[serde(flatten)]
    pub service: ServiceView,
    pub endpoints: Vec<EndpointView>,
    /// Pods matching the selector, or none when the selector is empty
    pub pods: Option<Vec<PodView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_affinity: Option<String>,
    pub events: Vec<EventView>,
}

/// A single endpoint address
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointView {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub ready: bool,
    pub ports: Vec<EndpointPort>,
}

impl ServiceView {
    pub fn new(svc: &Service, cluster: &ClusterMeta) -> Self {
        let spec = svc.spec.as_ref();
        let ingress = svc
            .status
            .iter()
            .filter_map(|s| s.load_balancer.as_ref())
            .flat_map(|lb| lb.ingress.iter().flatten())
            .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()));
        Self {
            object_meta: ObjectMeta::new(&svc.metadata, cluster),
            type_meta: TypeMeta::of::<Service>(),
            type_: spec
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            ports: spec.and_then(|s| s.ports.clone()).unwrap_or_default(),
            selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
            external_endpoints: spec
                .iter()
                .flat_map(|s| s.external_ips.iter().flatten())
                .cloned()
                .chain(ingress)
                .collect(),
        }
    }
}

impl Describe for ServiceView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Type, self.type_.as_str())
    }
}

/// Flattens an endpoints object into ready and not-ready addresses
pub fn endpoint_views(endpoints: &Endpoints) -> Vec<EndpointView> {
    let mut views = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let ports = subset.ports.clone().unwrap_or_default();
        let addresses = subset
            .addresses
            .iter()
            .flatten()
            .map(|a| (a, true))
            .chain(
                subset
                    .not_ready_addresses
                    .iter()
                    .flatten()
                    .map(|a| (a, false)),
            );
        for (addr, ready) in addresses {
            views.push(EndpointView {
                host: addr.ip.clone(),
                node_name: addr.node_name.clone(),
                ready,
                ports: ports.clone(),
            });
        }
    }
    views
}

/// Lists services, optionally restricted to exactly one service type
pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<ServiceView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let services = channels.open::<Service>();
    let services = services.recv().await?;
    channels.close().await;

    let service_type = req.service_type.as_deref().filter(|t| !t.is_empty());
    let cluster = ctx.cluster_meta();
    let rows = services
        .iter()
        .map(|svc| ServiceView::new(svc, cluster))
        .filter(|svc| service_type.is_none_or(|t| svc.type_ == t));
    Ok(ListResponse::new(req.query.select(rows)))
}

pub async fn get(
    ctx: &RequestContext,
    namespace: &str,
    name: &str,
) -> Result<ServiceDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let svc = ctx.cache().get::<Service>(Some(namespace), name)?;
    let selector = svc
        .spec
        .as_ref()
        .and_then(|s| s.selector.as_ref())
        .filter(|s| !s.is_empty())
        .map(Selector::from_labels);

    let channels = ctx.channels_in(namespace);
    let endpoints = channels.open::<Endpoints>();
    let pods = selector.map(|sel| channels.open_selected::<Pod>(sel));
    let events = channels.open::<Event>();

    let endpoints = endpoints.recv().await?;
    let pods = match pods {
        Some(pods) => Some(pods.recv().await?),
        None => None,
    };
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let endpoints = endpoints
        .iter()
        .filter(|ep| ep.metadata.name == svc.metadata.name)
        .flat_map(|ep| endpoint_views(ep))
        .collect();
    Ok(ServiceDetail {
        service: ServiceView::new(&svc, cluster),
        endpoints,
        pods: pods.map(|pods| PodView::with_warnings(&pods, &events, cluster)),
        session_affinity: svc.spec.as_ref().and_then(|s| s.session_affinity.clone()),
        events: event::views(
            &event::events_for(&events, super::uid_of(&svc.metadata)),
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
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset, ServiceSpec};
    use maplit::btreemap;

    fn service(name: &str, type_: &str, selector: Option<&str>) -> Service {
        Service {
            metadata: meta("ns", name),
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                selector: selector.map(|app| btreemap! { "app".to_string() => app.to_string() }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn filters_by_type() {
        let mut writers = Writers::default();
        writers.apply(service("web", "LoadBalancer", Some("web")));
        writers.apply(service("db", "ClusterIP", Some("db")));
        let ctx = admin_context(&writers);

        let mut req = ListRequest::new(NamespaceQuery::one("ns"), DataSelectQuery::default());
        req.service_type = Some("LoadBalancer".to_string());
        let rsp = list(&ctx, &req).await.unwrap();
        assert_eq!(rsp.total, 1);
        assert_eq!(rsp.items[0].object_meta.name, "web");

        // Partial and differently cased types match nothing.
        for partial in ["IP", "Balancer", "clusterip"] {
            req.service_type = Some(partial.to_string());
            assert_eq!(list(&ctx, &req).await.unwrap().total, 0, "{partial}");
        }
        req.service_type = Some("ClusterIP".to_string());
        let rsp = list(&ctx, &req).await.unwrap();
        assert_eq!(rsp.total, 1);
        assert_eq!(rsp.items[0].object_meta.name, "db");
    }

    #[tokio::test]
    async fn detail_flattens_endpoints_and_selects_pods() {
        let mut writers = Writers::default();
        writers.apply(service("web", "ClusterIP", Some("web")));
        writers.apply(service("external", "ExternalName", None));
        writers.apply(Endpoints {
            metadata: meta("ns", "web"),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.1".to_string(),
                    ..Default::default()
                }]),
                not_ready_addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.2".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        });
        writers.apply(pod(labeled(meta("ns", "web-a"), &[("app", "web")]), "Running", true));
        writers.apply(pod(labeled(meta("ns", "db-a"), &[("app", "db")]), "Running", true));
        let ctx = admin_context(&writers);

        let detail = get(&ctx, "ns", "web").await.unwrap();
        let endpoints = detail
            .endpoints
            .iter()
            .map(|e| (e.host.as_str(), e.ready))
            .collect::<Vec<_>>();
        assert_eq!(endpoints, [("10.0.0.1", true), ("10.0.0.2", false)]);
        let pods = detail.pods.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].object_meta.name, "web-a");

        let external = get(&ctx, "ns", "external").await.unwrap();
        assert!(external.pods.is_none());
    }
}

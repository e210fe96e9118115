//! Nodes and their allocated resources

use super::{pod::PodView, ListRequest};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{ListResponse, ObjectMeta, TypeMeta},
    Error,
};
use k8s_openapi::{
    api::core::v1::{Event, Node, NodeAddress, NodeCondition, Pod, Taint},
    apimachinery::pkg::api::resource::Quantity,
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    /// The status of the `Ready` condition: `True`, `False` or `Unknown`
    pub ready: String,
    pub unschedulable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet_version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    #[serde(flatten)]
    pub node: NodeView,
    pub allocated: Allocated,
    pub conditions: Vec<NodeCondition>,
    pub addresses: Vec<NodeAddress>,
    pub taints: Vec<Taint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
    pub pods: Vec<PodView>,
    pub events: Vec<EventView>,
}

/// Requests and limits of the pods scheduled to a node, against its capacity
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocated {
    pub cpu_requests: i64,
    pub cpu_limits: i64,
    pub cpu_capacity: i64,
    pub memory_requests: i64,
    pub memory_limits: i64,
    pub memory_capacity: i64,
    pub pods: i64,
    pub pod_capacity: i64,
}

impl NodeView {
    pub fn new(node: &Node, cluster: &ClusterMeta) -> Self {
        let status = node.status.as_ref();
        Self {
            object_meta: ObjectMeta::new(&node.metadata, cluster),
            type_meta: TypeMeta::of::<Node>(),
            ready: status
                .iter()
                .flat_map(|s| s.conditions.iter().flatten())
                .find(|c| c.type_ == "Ready")
                .map(|c| c.status.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            unschedulable: node
                .spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false),
            kubelet_version: status
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.clone()),
        }
    }
}

impl Describe for NodeView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta).with(Property::Status, self.ready.as_str())
    }
}

/// Parses a CPU quantity into millicores
pub fn cpu_millis(q: &Quantity) -> Result<i64, Error> {
    let s = q.0.trim();
    if let Some(m) = s.strip_suffix('m') {
        return m.parse::<i64>().map_err(|_| invalid(s));
    }
    let cores = s.parse::<f64>().map_err(|_| invalid(s))?;
    Ok((cores * 1000.0).round() as i64)
}

/// Parses a memory quantity into bytes
pub fn memory_bytes(q: &Quantity) -> Result<i64, Error> {
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    let s = q.0.trim();
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((s, 1.0));
    let n = number.parse::<f64>().map_err(|_| invalid(s))?;
    Ok((n * scale).round() as i64)
}

fn invalid(s: &str) -> Error {
    Error::BadRequest(format!("invalid quantity {s:?}"))
}

/// Sums the requests and limits of the pods running on a node
fn allocated(node: &Node, pods: &[Arc<Pod>]) -> Result<Allocated, Error> {
    let capacity = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref().or(s.capacity.as_ref()));
    let cap = |k: &str| capacity.and_then(|c| c.get(k));

    let mut alloc = Allocated {
        cpu_capacity: cap("cpu").map(cpu_millis).transpose()?.unwrap_or_default(),
        memory_capacity: cap("memory").map(memory_bytes).transpose()?.unwrap_or_default(),
        pod_capacity: cap("pods")
            .map(|q| q.0.parse::<i64>().map_err(|_| invalid(&q.0)))
            .transpose()?
            .unwrap_or_default(),
        ..Default::default()
    };

    let running = pods.iter().filter(|p| {
        !matches!(
            p.status.as_ref().and_then(|s| s.phase.as_deref()),
            Some("Succeeded") | Some("Failed")
        )
    });
    for pod in running {
        alloc.pods += 1;
        for c in pod.spec.iter().flat_map(|s| s.containers.iter()) {
            let Some(resources) = c.resources.as_ref() else {
                continue;
            };
            let requests = resources.requests.as_ref();
            let limits = resources.limits.as_ref();
            if let Some(q) = requests.and_then(|r| r.get("cpu")) {
                alloc.cpu_requests += cpu_millis(q)?;
            }
            if let Some(q) = limits.and_then(|r| r.get("cpu")) {
                alloc.cpu_limits += cpu_millis(q)?;
            }
            if let Some(q) = requests.and_then(|r| r.get("memory")) {
                alloc.memory_requests += memory_bytes(q)?;
            }
            if let Some(q) = limits.and_then(|r| r.get("memory")) {
                alloc.memory_limits += memory_bytes(q)?;
            }
        }
    }
    Ok(alloc)
}

pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<NodeView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let nodes = channels.open::<Node>();
    let nodes = nodes.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let rows = nodes.iter().map(|n| NodeView::new(n, cluster));
    Ok(ListResponse::new(req.query.select(rows)))
}

/// Returns a node with the pods scheduled to it
///
/// Allocation accounts for every pod on the node; the listed pods are only those the caller may
/// see.
pub async fn get(ctx: &RequestContext, name: &str) -> Result<NodeDetail, Error> {
    let node = ctx.cache().get::<Node>(None, name)?;

    let channels = ctx.channels(Default::default());
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();
    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let on_node = pods
        .iter()
        .filter(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(name))
        .cloned()
        .collect::<Vec<_>>();
    let allocated = allocated(&node, &on_node)?;
    let visible = ctx.identity().visible_namespaces();
    let on_node = on_node
        .into_iter()
        .filter(|p| visible.matches(p.metadata.namespace.as_deref()))
        .collect::<Vec<_>>();

    let cluster = ctx.cluster_meta();
    let spec = node.spec.as_ref();
    let status = node.status.as_ref();
    Ok(NodeDetail {
        node: NodeView::new(&node, cluster),
        allocated,
        conditions: status.and_then(|s| s.conditions.clone()).unwrap_or_default(),
        addresses: status.and_then(|s| s.addresses.clone()).unwrap_or_default(),
        taints: spec.and_then(|s| s.taints.clone()).unwrap_or_default(),
        pod_cidr: spec.and_then(|s| s.pod_cidr.clone()),
        pods: PodView::with_warnings(&on_node, &events, cluster),
        events: event::views(
            &event::events_for(&events, super::uid_of(&node.metadata)),
            cluster,
        ),
    })
}

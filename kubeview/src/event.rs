//! Events and warning derivation

use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    meta::{ListResponse, ObjectMeta},
    podinfo,
    resource::ListRequest,
    Error,
};
use ahash::AHashSet;
use k8s_openapi::{
    api::core::v1::{Event, Pod},
    apimachinery::pkg::apis::meta::v1::Time,
};
use serde::Serialize;
use std::sync::Arc;

/// Reason keywords that mark an untyped event as a warning
const FAILURE_KEYWORDS: [&str; 11] = [
    "failed",
    "err",
    "exceeded",
    "invalid",
    "unhealthy",
    "mismatch",
    "insufficient",
    "conflict",
    "outof",
    "nil",
    "backoff",
];

pub const WARNING: &str = "Warning";
pub const NORMAL: &str = "Normal";

/// An event as returned to callers
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub object_meta: ObjectMeta,
    #[serde(rename = "type")]
    pub type_: String,
    pub reason: String,
    pub message: String,
    pub source_component: String,
    pub source_host: String,
    pub object: String,
    pub object_kind: String,
    pub object_uid: String,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<Time>,
}

/// Returns the event's type, inferring it from the reason when the type is empty
pub fn event_type(event: &Event) -> &'static str {
    match event.type_.as_deref() {
        Some(WARNING) => WARNING,
        Some(t) if !t.is_empty() => NORMAL,
        _ => {
            let reason = event.reason.as_deref().unwrap_or_default().to_lowercase();
            if FAILURE_KEYWORDS.iter().any(|k| reason.contains(k)) {
                WARNING
            } else {
                NORMAL
            }
        }
    }
}

/// Selects the warnings that explain why `pods` are unhealthy
///
/// Keeps warning events whose involved object is a pod that is neither ready nor succeeded, and
/// keeps only the first event for each reason. Applying this to its own output with the same pods
/// yields the same events.
pub fn derive_warnings(events: &[Arc<Event>], pods: &[Arc<Pod>]) -> Vec<Arc<Event>> {
    let unhealthy = pods
        .iter()
        .filter(|p| !podinfo::is_ready(p))
        .filter_map(|p| p.metadata.uid.as_deref())
        .collect::<AHashSet<_>>();

    let mut reasons = AHashSet::new();
    events
        .iter()
        .filter(|e| event_type(e) == WARNING)
        .filter(|e| {
            e.involved_object
                .uid
                .as_deref()
                .is_some_and(|uid| unhealthy.contains(uid))
        })
        .filter(|e| reasons.insert(e.reason.clone().unwrap_or_default()))
        .cloned()
        .collect()
}

/// Returns the events whose involved object has the given UID
pub fn events_for(events: &[Arc<Event>], uid: &str) -> Vec<Arc<Event>> {
    events
        .iter()
        .filter(|e| e.involved_object.uid.as_deref() == Some(uid))
        .cloned()
        .collect()
}

/// Lists events visible to the request's namespaces
///
/// When the request names an involved object UID, only that object's events are listed.
pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<EventView>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let events = channels.open::<Event>();
    let mut events = events.recv().await?;
    channels.close().await;

    if let Some(uid) = req.involved_uid.as_deref() {
        events = events_for(&events, uid);
    }
    let views = events.iter().map(|e| EventView::new(e, ctx.cluster_meta()));
    Ok(ListResponse::new(req.query.select(views)))
}

/// Returns a single event
pub fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<EventView, Error> {
    ctx.authorize_namespace(namespace)?;
    let event = ctx.cache().get::<Event>(Some(namespace), name)?;
    Ok(EventView::new(&event, ctx.cluster_meta()))
}

/// Projects events into views
pub fn views(events: &[Arc<Event>], cluster: &ClusterMeta) -> Vec<EventView> {
    events.iter().map(|e| EventView::new(e, cluster)).collect()
}

// === impl EventView ===

impl EventView {
    pub fn new(event: &Event, cluster: &ClusterMeta) -> Self {
        let source = event.source.as_ref();
        let obj = &event.involved_object;
        Self {
            object_meta: ObjectMeta::new(&event.metadata, cluster),
            type_: event_type(event).to_string(),
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            source_component: source
                .and_then(|s| s.component.clone())
                .unwrap_or_default(),
            source_host: source.and_then(|s| s.host.clone()).unwrap_or_default(),
            object: obj.name.clone().unwrap_or_default(),
            object_kind: obj.kind.clone().unwrap_or_default(),
            object_uid: obj.uid.clone().unwrap_or_default(),
            count: event.count.unwrap_or(1),
            first_seen: event.first_timestamp.clone(),
            last_seen: event
                .last_timestamp
                .clone()
                .or_else(|| event.event_time.as_ref().map(|t| Time(t.0))),
        }
    }
}

impl Describe for EventView {
    fn describe(&self) -> Properties {
        let created = self
            .last_seen
            .as_ref()
            .or(self.object_meta.creation_timestamp.as_ref());
        Properties::default()
            .with(Property::Name, self.object_meta.name.as_str())
            .with_opt(Property::Namespace, self.object_meta.namespace.as_deref())
            .with_opt(Property::CreationTimestamp, created)
            .with(Property::Type, self.type_.as_str())
            .with(Property::Reason, self.reason.as_str())
    }
}

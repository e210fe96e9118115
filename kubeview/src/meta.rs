//! View-model metadata shared by every returned entity

use crate::{cache::Cached, cluster::ClusterMeta, dataselect::Selection};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::Serialize;
use std::collections::BTreeMap;

/// Object metadata as returned to callers, stamped with the cluster it came from
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<metav1::Time>,
    pub uid: String,
    pub resource_version: String,
    pub cluster: ClusterMeta,
}

/// The kind and API version of an entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub kind: String,
    pub api_version: String,
}

/// The list envelope: one page of items, the filtered total, and an optional status histogram
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListResponse<T, S = ()> {
    pub total: usize,
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<S>,
}

// === impl ObjectMeta ===

impl ObjectMeta {
    pub fn new(meta: &metav1::ObjectMeta, cluster: &ClusterMeta) -> Self {
        Self {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            labels: meta.labels.clone().unwrap_or_default(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            creation_timestamp: meta.creation_timestamp.clone(),
            uid: meta.uid.clone().unwrap_or_default(),
            resource_version: meta.resource_version.clone().unwrap_or_default(),
            cluster: cluster.clone(),
        }
    }
}

// === impl TypeMeta ===

impl TypeMeta {
    pub fn of<K: Cached>() -> Self {
        Self {
            kind: K::kind(&()).into_owned(),
            api_version: K::api_version(&()).into_owned(),
        }
    }
}

// === impl ListResponse ===

impl<T> ListResponse<T> {
    pub fn new(selection: Selection<T>) -> Self {
        Self {
            total: selection.total,
            items: selection.items,
            status: None,
        }
    }
}

impl<T, S> ListResponse<T, S> {
    pub fn with_status<S2>(self, status: S2) -> ListResponse<T, S2> {
        ListResponse {
            total: self.total,
            items: self.items,
            status: Some(status),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResponse<U, S> {
        ListResponse {
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
            status: self.status,
        }
    }
}

/// Returns true if `meta` names `uid` among its controller owner references
pub fn controlled_by(meta: &metav1::ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Returns true if `meta` names `uid` among any of its owner references
pub fn owned_by(meta: &metav1::ObjectMeta, uid: &str) -> bool {
    meta.owner_references.iter().flatten().any(|r| r.uid == uid)
}

/// Returns the controller owner reference, if any
pub fn controller_of(meta: &metav1::ObjectMeta) -> Option<&metav1::OwnerReference> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true))
}

//! The static table of served resource kinds
//!
//! Every kind is addressed by its canonical plural (`deployments`). Requests may also name a kind
//! by a `k8s_`-prefixed plural, its singular or its short name; [`normalize`] maps each of these
//! to the canonical plural.

use crate::Error;
use kube_core::{ApiResource, GroupVersionKind};

/// A served kind
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub plural: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub namespaced: bool,
    pub short_names: &'static [&'static str],
}

macro_rules! resources {
    ($(
        $plural:literal => (
            $group:literal, $version:literal, $kind:literal, $ns:literal
            $(, [$($short:literal),*])?
        )
    ),+ $(,)?) => {
        /// Every served kind, by canonical plural
        pub const RESOURCES: &[ResourceInfo] = &[
            $(ResourceInfo {
                plural: $plural,
                group: $group,
                version: $version,
                kind: $kind,
                namespaced: $ns,
                short_names: &[$($($short),*)?],
            }),+
        ];
    };
}

resources! {
    "pods" => ("", "v1", "Pod", true, ["po"]),
    "services" => ("", "v1", "Service", true, ["svc"]),
    "endpoints" => ("", "v1", "Endpoints", true, ["ep"]),
    "configmaps" => ("", "v1", "ConfigMap", true, ["cm"]),
    "secrets" => ("", "v1", "Secret", true),
    "persistentvolumeclaims" => ("", "v1", "PersistentVolumeClaim", true, ["pvc"]),
    "persistentvolumes" => ("", "v1", "PersistentVolume", false, ["pv"]),
    "nodes" => ("", "v1", "Node", false, ["no"]),
    "namespaces" => ("", "v1", "Namespace", false, ["ns"]),
    "events" => ("", "v1", "Event", true, ["ev"]),
    "limitranges" => ("", "v1", "LimitRange", true, ["limits"]),
    "resourcequotas" => ("", "v1", "ResourceQuota", true, ["quota"]),
    "serviceaccounts" => ("", "v1", "ServiceAccount", true, ["sa"]),
    "deployments" => ("apps", "v1", "Deployment", true, ["deploy"]),
    "replicasets" => ("apps", "v1", "ReplicaSet", true, ["rs"]),
    "daemonsets" => ("apps", "v1", "DaemonSet", true, ["ds"]),
    "statefulsets" => ("apps", "v1", "StatefulSet", true, ["sts"]),
    "jobs" => ("batch", "v1", "Job", true),
    "cronjobs" => ("batch", "v1", "CronJob", true, ["cj"]),
    "ingresses" => ("networking.k8s.io", "v1", "Ingress", true, ["ing"]),
    "storageclasses" => ("storage.k8s.io", "v1", "StorageClass", false, ["sc"]),
    "horizontalpodautoscalers" => ("autoscaling", "v2", "HorizontalPodAutoscaler", true, ["hpa"]),
    "roles" => ("rbac.authorization.k8s.io", "v1", "Role", true),
    "rolebindings" => ("rbac.authorization.k8s.io", "v1", "RoleBinding", true),
    "clusterroles" => ("rbac.authorization.k8s.io", "v1", "ClusterRole", false),
    "clusterrolebindings" => ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", false),
}

const ALIAS_PREFIX: &str = "k8s_";

// === impl ResourceInfo ===

impl ResourceInfo {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Describes the kind for a dynamic client
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(self.group, self.version, self.kind);
        ApiResource::from_gvk_with_plural(&gvk, self.plural)
    }
}

/// Maps any accepted name of a kind to its canonical plural
pub fn normalize(name: &str) -> Option<&'static str> {
    let name = name.strip_prefix(ALIAS_PREFIX).unwrap_or(name).to_ascii_lowercase();
    RESOURCES
        .iter()
        .find(|r| {
            r.plural == name
                || r.kind.eq_ignore_ascii_case(&name)
                || r.short_names.contains(&name.as_str())
        })
        .map(|r| r.plural)
}

/// Looks up a kind by any accepted name
pub fn lookup(name: &str) -> Result<&'static ResourceInfo, Error> {
    let plural = normalize(name)
        .ok_or_else(|| Error::BadRequest(format!("unknown resource kind {name:?}")))?;
    RESOURCES
        .iter()
        .find(|r| r.plural == plural)
        .ok_or_else(|| Error::BadRequest(format!("unknown resource kind {name:?}")))
}

/// Looks up a kind by the `apiVersion` and `kind` of a manifest
pub fn lookup_kind(api_version: &str, kind: &str) -> Result<&'static ResourceInfo, Error> {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    RESOURCES
        .iter()
        .find(|r| r.group == group && r.version == version && r.kind == kind)
        .ok_or_else(|| Error::BadRequest(format!("unsupported kind {api_version}/{kind}")))
}

//! Pods

use super::{ListRequest, StatusCounts};
use crate::{
    cluster::ClusterMeta,
    context::RequestContext,
    dataselect::{Describe, Properties, Property},
    event::{self, EventView},
    meta::{self, ListResponse, ObjectMeta, TypeMeta},
    podinfo::{self, ResourceStatus},
    Error,
};
use k8s_openapi::{
    api::core::v1::{
        ConfigMap, Container, ContainerPort, EnvVarSource, Event, Pod, PodCondition, Secret,
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use serde::Serialize;
use std::sync::Arc;

/// A pod list row
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodView {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub status: String,
    pub phase: String,
    pub restart_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    pub container_images: Vec<String>,
    pub warnings: Vec<EventView>,
}

/// A pod with its containers, resolved environment, owner and events
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDetail {
    #[serde(flatten)]
    pub pod: PodView,
    pub init_containers: Vec<ContainerView>,
    pub containers: Vec<ContainerView>,
    pub conditions: Vec<PodCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<OwnerReference>,
    pub persistent_volume_claims: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    pub events: Vec<EventView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub env: Vec<EnvVarView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// An environment variable with its value resolved where possible
///
/// Values that could not be resolved are empty and keep the reference they were declared with.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarView {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

// === impl PodView ===

impl PodView {
    pub fn new(pod: &Pod, warnings: Vec<EventView>, cluster: &ClusterMeta) -> Self {
        let status = pod.status.as_ref();
        Self {
            object_meta: ObjectMeta::new(&pod.metadata, cluster),
            type_meta: TypeMeta::of::<Pod>(),
            status: podinfo::pod_status(pod),
            phase: status
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            restart_count: status
                .iter()
                .flat_map(|s| s.container_statuses.iter().flatten())
                .map(|c| c.restart_count)
                .sum(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            pod_ip: status.and_then(|s| s.pod_ip.clone()),
            container_images: super::container_images(pod.spec.as_ref()),
            warnings,
        }
    }

    /// Projects pods into rows, attaching the warnings that apply to each
    pub fn with_warnings(
        pods: &[Arc<Pod>],
        events: &[Arc<Event>],
        cluster: &ClusterMeta,
    ) -> Vec<Self> {
        pods.iter()
            .map(|pod| {
                let warnings = event::derive_warnings(events, std::slice::from_ref(pod));
                Self::new(pod, event::views(&warnings, cluster), cluster)
            })
            .collect()
    }

    fn phase_status(&self) -> ResourceStatus {
        match self.phase.as_str() {
            "Running" => ResourceStatus::Running,
            "Failed" => ResourceStatus::Failed,
            "Succeeded" => ResourceStatus::Succeeded,
            _ => ResourceStatus::Pending,
        }
    }
}

impl Describe for PodView {
    fn describe(&self) -> Properties {
        Properties::of_meta(&self.object_meta)
            .with(Property::Status, self.status.as_str())
            .with(Property::Phase, self.phase.as_str())
            .with_opt(Property::NodeName, self.node_name.as_deref())
    }
}

/// Lists pods with their warnings and a phase histogram
pub async fn list(
    ctx: &RequestContext,
    req: &ListRequest,
) -> Result<ListResponse<PodView, StatusCounts>, Error> {
    let channels = ctx.channels(req.namespaces.clone());
    let pods = channels.open::<Pod>();
    let events = channels.open::<Event>();

    let pods = pods.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let rows = PodView::with_warnings(&pods, &events, ctx.cluster_meta());
    Ok(super::select_with_status(&req.query, rows, PodView::phase_status))
}

/// Returns a pod with its environment resolved against the config maps and secrets of its
/// namespace
pub async fn get(ctx: &RequestContext, namespace: &str, name: &str) -> Result<PodDetail, Error> {
    ctx.authorize_namespace(namespace)?;
    let pod = ctx.cache().get::<Pod>(Some(namespace), name)?;

    let channels = ctx.channels_in(namespace);
    let configmaps = channels.open::<ConfigMap>();
    let secrets = channels.open::<Secret>();
    let events = channels.open::<Event>();

    let configmaps = configmaps.recv().await?;
    let secrets = secrets.recv().await?;
    let events = events.recv().await?;
    channels.close().await;

    let cluster = ctx.cluster_meta();
    let env = EnvResolver {
        pod: &pod,
        configmaps: &configmaps,
        secrets: &secrets,
    };
    let spec = pod.spec.as_ref();
    let uid = super::uid_of(&pod.metadata);
    let warnings = event::derive_warnings(&events, std::slice::from_ref(&pod));

    Ok(PodDetail {
        init_containers: spec
            .iter()
            .flat_map(|s| s.init_containers.iter().flatten())
            .map(|c| env.container(c))
            .collect(),
        containers: spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .map(|c| env.container(c))
            .collect(),
        conditions: pod
            .status
            .iter()
            .flat_map(|s| s.conditions.iter().flatten())
            .cloned()
            .collect(),
        controller: meta::controller_of(&pod.metadata).cloned(),
        persistent_volume_claims: claim_names(&pod).map(str::to_string).collect(),
        qos_class: pod.status.as_ref().and_then(|s| s.qos_class.clone()),
        service_account_name: spec.and_then(|s| s.service_account_name.clone()),
        events: event::views(&event::events_for(&events, uid), cluster),
        pod: PodView::new(&pod, event::views(&warnings, cluster), cluster),
    })
}

/// Returns the names of the claims a pod mounts
pub fn claim_names(pod: &Pod) -> impl Iterator<Item = &str> {
    pod.spec
        .iter()
        .flat_map(|s| s.volumes.iter().flatten())
        .filter_map(|v| v.persistent_volume_claim.as_ref())
        .map(|c| c.claim_name.as_str())
}

struct EnvResolver<'a> {
    pod: &'a Pod,
    configmaps: &'a [Arc<ConfigMap>],
    secrets: &'a [Arc<Secret>],
}

impl EnvResolver<'_> {
    fn container(&self, c: &Container) -> ContainerView {
        let mut env = Vec::new();

        for from in c.env_from.iter().flatten() {
            let prefix = from.prefix.as_deref().unwrap_or_default();
            if let Some(cm) = from.config_map_ref.as_ref().and_then(|r| self.configmap(&r.name)) {
                for (k, v) in cm.data.iter().flatten() {
                    env.push(EnvVarView {
                        name: format!("{prefix}{k}"),
                        value: v.clone(),
                        value_from: None,
                    });
                }
            }
            if let Some(secret) = from.secret_ref.as_ref().and_then(|r| self.secret(&r.name)) {
                for (k, v) in secret.data.iter().flatten() {
                    env.push(EnvVarView {
                        name: format!("{prefix}{k}"),
                        value: String::from_utf8_lossy(&v.0).into_owned(),
                        value_from: None,
                    });
                }
            }
        }

        for var in c.env.iter().flatten() {
            let value = match (&var.value, &var.value_from) {
                (Some(v), _) => Some(v.clone()),
                (None, Some(from)) => self.resolve(from),
                (None, None) => Some(String::new()),
            };
            env.push(match value {
                Some(value) => EnvVarView {
                    name: var.name.clone(),
                    value,
                    value_from: None,
                },
                None => EnvVarView {
                    name: var.name.clone(),
                    value: String::new(),
                    value_from: var.value_from.clone(),
                },
            });
        }

        ContainerView {
            name: c.name.clone(),
            image: c.image.clone(),
            env,
            ports: c.ports.clone().unwrap_or_default(),
            command: c.command.clone().unwrap_or_default(),
            args: c.args.clone().unwrap_or_default(),
        }
    }

    fn resolve(&self, from: &EnvVarSource) -> Option<String> {
        if let Some(r) = &from.config_map_key_ref {
            return self.configmap(&r.name)?.data.as_ref()?.get(&r.key).cloned();
        }
        if let Some(r) = &from.secret_key_ref {
            let bytes = self.secret(&r.name)?.data.as_ref()?.get(&r.key)?.clone();
            return Some(String::from_utf8_lossy(&bytes.0).into_owned());
        }
        if let Some(r) = &from.field_ref {
            let spec = self.pod.spec.as_ref();
            let status = self.pod.status.as_ref();
            return match r.field_path.as_str() {
                "metadata.name" => self.pod.metadata.name.clone(),
                "metadata.namespace" => self.pod.metadata.namespace.clone(),
                "metadata.uid" => self.pod.metadata.uid.clone(),
                "spec.nodeName" => spec.and_then(|s| s.node_name.clone()),
                "spec.serviceAccountName" => spec.and_then(|s| s.service_account_name.clone()),
                "status.podIP" => status.and_then(|s| s.pod_ip.clone()),
                "status.hostIP" => status.and_then(|s| s.host_ip.clone()),
                _ => None,
            };
        }
        None
    }

    fn configmap(&self, name: &str) -> Option<&ConfigMap> {
        self.configmaps
            .iter()
            .find(|cm| cm.metadata.name.as_deref() == Some(name))
            .map(|cm| &**cm)
    }

    fn secret(&self, name: &str) -> Option<&Secret> {
        self.secrets
            .iter()
            .find(|s| s.metadata.name.as_deref() == Some(name))
            .map(|s| &**s)
    }
}

//! Pod aggregates for controllers

use crate::event::EventView;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::sync::Arc;

/// Pod counts for a controller
///
/// `running + pending + failed + succeeded` never exceeds the number of pods counted; pods in an
/// unknown phase are not counted in any bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub current: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<i32>,
    pub running: i32,
    pub pending: i32,
    pub failed: i32,
    pub succeeded: i32,
    pub warnings: Vec<EventView>,
}

/// The rolled-up status of a controller
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceStatus {
    Running,
    Pending,
    Failed,
    Succeeded,
}

/// A histogram of statuses over every row that matched a list request's filters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

// === impl PodInfo ===

impl PodInfo {
    /// Counts `pods` by phase
    pub fn new(current: i32, desired: Option<i32>, pods: &[Arc<Pod>]) -> Self {
        let mut info = Self {
            current,
            desired,
            ..Default::default()
        };
        for pod in pods {
            match phase(pod) {
                Some("Running") => info.running += 1,
                Some("Pending") => info.pending += 1,
                Some("Failed") => info.failed += 1,
                Some("Succeeded") => info.succeeded += 1,
                _ => {}
            }
        }
        info
    }

    pub fn with_warnings(mut self, warnings: Vec<EventView>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Rolls the counts up into a single status
    ///
    /// Without a desired count, the current count is the target.
    pub fn status(&self) -> ResourceStatus {
        let desired = self.desired.unwrap_or(self.current);
        if self.failed > 0 {
            ResourceStatus::Failed
        } else if self.pending > 0 {
            ResourceStatus::Pending
        } else if self.succeeded == desired {
            ResourceStatus::Succeeded
        } else if self.running == desired {
            ResourceStatus::Running
        } else {
            ResourceStatus::Pending
        }
    }
}

// === impl ResourceStatus ===

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Pending => "Pending",
            Self::Failed => "Failed",
            Self::Succeeded => "Succeeded",
        }
    }
}

// === impl StatusCounts ===

impl StatusCounts {
    pub fn count(&mut self, status: ResourceStatus) {
        match status {
            ResourceStatus::Running => self.running += 1,
            ResourceStatus::Pending => self.pending += 1,
            ResourceStatus::Failed => self.failed += 1,
            ResourceStatus::Succeeded => self.succeeded += 1,
        }
    }
}

impl FromIterator<ResourceStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = ResourceStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.count(status);
        }
        counts
    }
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// A pod is ready when it is running with a true `Ready` condition, or when it has succeeded
pub fn is_ready(pod: &Pod) -> bool {
    match phase(pod) {
        Some("Succeeded") => true,
        Some("Running") => pod
            .status
            .iter()
            .flat_map(|s| s.conditions.iter().flatten())
            .any(|c| c.type_ == "Ready" && c.status == "True"),
        _ => false,
    }
}

/// Describes a pod's status the way `kubectl get pods` does
pub fn pod_status(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }
    let Some(status) = pod.status.as_ref() else {
        return "Unknown".to_string();
    };
    let mut reason = status
        .reason
        .clone()
        .or_else(|| status.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    for cs in status.init_container_statuses.iter().flatten() {
        let Some(state) = cs.state.as_ref() else {
            continue;
        };
        if let Some(t) = state.terminated.as_ref() {
            if t.exit_code != 0 {
                return format!("Init:{}", t.reason.as_deref().unwrap_or("Error"));
            }
        } else if let Some(w) = state.waiting.as_ref() {
            match w.reason.as_deref() {
                Some(r) if r != "PodInitializing" => return format!("Init:{r}"),
                _ => return "Init".to_string(),
            }
        }
    }

    for cs in status.container_statuses.iter().flatten().rev() {
        let Some(state) = cs.state.as_ref() else {
            continue;
        };
        if let Some(r) = state.waiting.as_ref().and_then(|w| w.reason.as_ref()) {
            reason = r.clone();
        } else if let Some(t) = state.terminated.as_ref() {
            reason = t
                .reason
                .clone()
                .unwrap_or_else(|| format!("ExitCode:{}", t.exit_code));
        }
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodCondition, PodStatus,
    };

    fn pod(phase: &str) -> Arc<Pod> {
        Arc::new(Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn counts_never_exceed_pods() {
        let pods = vec![pod("Running"), pod("Pending"), pod("Unknown"), Arc::new(Pod::default())];
        let info = PodInfo::new(4, Some(4), &pods);
        assert_eq!(info.running + info.pending + info.failed + info.succeeded, 2);
    }

    #[test]
    fn rolls_up_status() {
        let running = vec![pod("Running"), pod("Running")];
        assert_eq!(PodInfo::new(2, Some(2), &running).status(), ResourceStatus::Running);
        assert_eq!(PodInfo::new(2, Some(3), &running).status(), ResourceStatus::Pending);

        let mixed = vec![pod("Running"), pod("Pending"), pod("Failed")];
        assert_eq!(PodInfo::new(3, Some(3), &mixed).status(), ResourceStatus::Failed);

        let done = vec![pod("Succeeded")];
        assert_eq!(PodInfo::new(1, None, &done).status(), ResourceStatus::Succeeded);
    }

    #[test]
    fn readiness_requires_the_ready_condition() {
        let mut p = (*pod("Running")).clone();
        assert!(!is_ready(&p));
        p.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]);
        assert!(is_ready(&p));
        assert!(is_ready(&pod("Succeeded")));
        assert!(!is_ready(&pod("Pending")));
    }

    #[test]
    fn reports_waiting_reasons() {
        let mut p = (*pod("Running")).clone();
        p.status.as_mut().unwrap().container_statuses = Some(vec![ContainerStatus {
            name: "app".to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("CrashLoopBackOff".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        assert_eq!(pod_status(&p), "CrashLoopBackOff");
    }
}

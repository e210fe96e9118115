//! The Helm client seam
//!
//! The concrete Helm client lives outside this crate. [`HelmClient`] describes the release
//! operations the facade needs and [`ChartRepository`] resolves chart archives by repository and
//! name.

use crate::Error;
use bytes::Bytes;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::Serialize;
use std::{fmt, time::Duration};

/// The lifecycle state of a release revision
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Deleting,
    Failed,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    Superseded,
}

/// A chart's name and version
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChartMeta {
    pub name: String,
    pub version: String,
}

/// A chart archive loaded from a repository
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chart {
    pub repo: String,
    pub meta: ChartMeta,
    pub archive: Bytes,
}

/// The status of a release revision
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub status: ReleaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<Time>,
    pub description: String,
}

/// One revision of a release
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub version: i32,
    pub chart: ChartMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    pub values: serde_json::Value,
    pub manifest: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallOptions {
    pub name: Option<String>,
    pub namespace: String,
    pub values: serde_json::Value,
    pub reuse_name: bool,
    pub disable_hooks: bool,
    pub wait: bool,
    pub dry_run: bool,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpgradeOptions {
    pub values: serde_json::Value,
    pub reuse_values: bool,
    pub reset_values: bool,
    pub disable_hooks: bool,
    pub wait: bool,
    pub dry_run: bool,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackOptions {
    pub revision: i32,
    pub description: Option<String>,
    pub disable_hooks: bool,
    pub recreate: bool,
    pub wait: bool,
}

/// Release operations against one cluster
#[async_trait::async_trait]
pub trait HelmClient: Send + Sync + 'static {
    /// Lists every revision of every release, optionally within one namespace
    async fn list_releases(&self, namespace: Option<&str>) -> Result<Vec<Release>, Error>;

    /// Returns the latest revision of a release
    async fn release_content(&self, name: &str) -> Result<Release, Error>;

    async fn release_status(&self, name: &str) -> Result<Info, Error>;

    /// Returns every revision of a release, in no particular order
    async fn release_history(&self, name: &str) -> Result<Vec<Release>, Error>;

    async fn install(&self, chart: &Chart, opts: &InstallOptions) -> Result<Release, Error>;

    async fn upgrade(
        &self,
        name: &str,
        chart: &Chart,
        opts: &UpgradeOptions,
    ) -> Result<Release, Error>;

    async fn rollback(&self, name: &str, opts: &RollbackOptions) -> Result<Release, Error>;

    async fn delete(&self, name: &str, purge: bool) -> Result<Release, Error>;
}

/// Resolves charts by repository, name and optional version
#[async_trait::async_trait]
pub trait ChartRepository: Send + Sync + 'static {
    async fn load(&self, repo: &str, name: &str, version: Option<&str>) -> Result<Chart, Error>;
}

/// A `repo/chart` reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartRef {
    pub repo: String,
    pub name: String,
}

// === impl ReleaseStatus ===

impl ReleaseStatus {
    pub const ALL: [ReleaseStatus; 9] = [
        Self::Unknown,
        Self::Deployed,
        Self::Deleted,
        Self::Deleting,
        Self::Failed,
        Self::PendingInstall,
        Self::PendingUpgrade,
        Self::PendingRollback,
        Self::Superseded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Deployed => "Deployed",
            Self::Deleted => "Deleted",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
            Self::PendingInstall => "PendingInstall",
            Self::PendingUpgrade => "PendingUpgrade",
            Self::PendingRollback => "PendingRollback",
            Self::Superseded => "Superseded",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Release ===

impl Release {
    pub fn status(&self) -> ReleaseStatus {
        self.info.as_ref().map(|i| i.status).unwrap_or_default()
    }
}

// === impl ChartRef ===

impl std::str::FromStr for ChartRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.split_once('/') {
            Some((repo, name)) if !repo.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    repo: repo.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::BadRequest(format!(
                "invalid chart {s:?}: expected REPO/CHART"
            ))),
        }
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chart_refs() {
        let chart = "infra/redis".parse::<ChartRef>().unwrap();
        assert_eq!(chart.repo, "infra");
        assert_eq!(chart.name, "redis");
        assert_eq!(chart.to_string(), "infra/redis");

        for invalid in ["redis", "/redis", "infra/", "a/b/c"] {
            assert_eq!(
                invalid.parse::<ChartRef>().unwrap_err().kind(),
                "bad-request",
                "{invalid}"
            );
        }
    }
}

//! An in-memory Helm backend
//!
//! Keeps every revision of every release in process memory. Useful for running the server
//! without a Helm installation and for exercising the release facade.

use super::helm::{
    Chart, ChartMeta, ChartRepository, HelmClient, Info, InstallOptions, Release, ReleaseStatus,
    RollbackOptions, UpgradeOptions,
};
use crate::Error;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, MutexGuard, PoisonError,
};

/// Stores release revisions in memory
#[derive(Debug, Default)]
pub struct InMemoryHelm {
    revisions: Mutex<Vec<Release>>,
    installs: Mutex<Vec<InstallOptions>>,
    status_unavailable: AtomicBool,
    generated: AtomicUsize,
}

/// Serves charts from memory
#[derive(Debug, Default)]
pub struct InMemoryCharts {
    charts: Vec<Chart>,
}

// === impl InMemoryHelm ===

impl InMemoryHelm {
    /// Seeds a release revision
    pub fn with_release(self, release: Release) -> Self {
        self.revisions().push(release);
        self
    }

    /// Makes status lookups fail, as when the release backend is degraded
    pub fn set_status_unavailable(&self, unavailable: bool) {
        self.status_unavailable.store(unavailable, Ordering::Release);
    }

    /// Returns the options of every install, in order
    pub fn installs(&self) -> Vec<InstallOptions> {
        self.installs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn revisions(&self) -> MutexGuard<'_, Vec<Release>> {
        self.revisions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latest<'r>(revisions: &'r [Release], name: &str) -> Option<&'r Release> {
        revisions
            .iter()
            .filter(|r| r.name == name)
            .max_by_key(|r| r.version)
    }

    fn supersede(revisions: &mut [Release], name: &str) {
        for r in revisions.iter_mut().filter(|r| r.name == name) {
            if let Some(info) = r.info.as_mut() {
                if info.status == ReleaseStatus::Deployed {
                    info.status = ReleaseStatus::Superseded;
                }
            }
        }
    }
}

fn info(status: ReleaseStatus, description: impl Into<String>) -> Option<Info> {
    Some(Info {
        status,
        last_deployed: Some(Time(Timestamp::now())),
        description: description.into(),
    })
}

fn not_found(name: &str) -> Error {
    Error::NotFound(format!("release {name}"))
}

#[async_trait::async_trait]
impl HelmClient for InMemoryHelm {
    async fn list_releases(&self, namespace: Option<&str>) -> Result<Vec<Release>, Error> {
        Ok(self
            .revisions()
            .iter()
            .filter(|r| namespace.is_none_or(|ns| r.namespace == ns))
            .cloned()
            .collect())
    }

    async fn release_content(&self, name: &str) -> Result<Release, Error> {
        let revisions = self.revisions();
        Self::latest(&revisions, name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn release_status(&self, name: &str) -> Result<Info, Error> {
        if self.status_unavailable.load(Ordering::Acquire) {
            return Err(Error::UpstreamTimeout(format!("status of release {name}")));
        }
        let revisions = self.revisions();
        Self::latest(&revisions, name)
            .and_then(|r| r.info.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn release_history(&self, name: &str) -> Result<Vec<Release>, Error> {
        let history = self
            .revisions()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect::<Vec<_>>();
        if history.is_empty() {
            return Err(not_found(name));
        }
        Ok(history)
    }

    async fn install(&self, chart: &Chart, opts: &InstallOptions) -> Result<Release, Error> {
        self.installs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(opts.clone());

        let mut revisions = self.revisions();
        let name = match opts.name.clone() {
            Some(name) => name,
            None => format!(
                "{}-{}",
                chart.meta.name,
                self.generated.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let previous = Self::latest(&revisions, &name).map(|r| (r.version, r.status()));
        if let Some((_, status)) = previous {
            if status != ReleaseStatus::Deleted && !opts.reuse_name {
                return Err(Error::Conflict(format!("release {name} exists")));
            }
        }
        let release = Release {
            name,
            namespace: opts.namespace.clone(),
            version: previous.map(|(v, _)| v + 1).unwrap_or(1),
            chart: chart.meta.clone(),
            info: info(ReleaseStatus::Deployed, "Install complete"),
            values: opts.values.clone(),
            manifest: String::new(),
        };
        if !opts.dry_run {
            revisions.push(release.clone());
        }
        Ok(release)
    }

    async fn upgrade(
        &self,
        name: &str,
        chart: &Chart,
        opts: &UpgradeOptions,
    ) -> Result<Release, Error> {
        let mut revisions = self.revisions();
        let current = Self::latest(&revisions, name)
            .cloned()
            .ok_or_else(|| not_found(name))?;
        let values = if opts.reuse_values && !opts.reset_values {
            current.values.clone()
        } else {
            opts.values.clone()
        };
        let release = Release {
            version: current.version + 1,
            chart: chart.meta.clone(),
            info: info(ReleaseStatus::Deployed, "Upgrade complete"),
            values,
            ..current
        };
        if !opts.dry_run {
            Self::supersede(&mut revisions, name);
            revisions.push(release.clone());
        }
        Ok(release)
    }

    async fn rollback(&self, name: &str, opts: &RollbackOptions) -> Result<Release, Error> {
        let mut revisions = self.revisions();
        let latest = Self::latest(&revisions, name)
            .map(|r| r.version)
            .ok_or_else(|| not_found(name))?;
        let target = revisions
            .iter()
            .find(|r| r.name == name && r.version == opts.revision)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("release {name} revision {}", opts.revision)))?;
        let description = opts
            .description
            .clone()
            .unwrap_or_else(|| format!("Rollback to {}", opts.revision));
        let release = Release {
            version: latest + 1,
            info: info(ReleaseStatus::Deployed, description),
            ..target
        };
        Self::supersede(&mut revisions, name);
        revisions.push(release.clone());
        Ok(release)
    }

    async fn delete(&self, name: &str, purge: bool) -> Result<Release, Error> {
        let mut revisions = self.revisions();
        let latest = Self::latest(&revisions, name)
            .cloned()
            .ok_or_else(|| not_found(name))?;
        if purge {
            revisions.retain(|r| r.name != name);
        } else {
            for r in revisions.iter_mut().filter(|r| r.name == name) {
                r.info = info(ReleaseStatus::Deleted, "Deletion complete");
            }
        }
        Ok(Release {
            info: info(ReleaseStatus::Deleted, "Deletion complete"),
            ..latest
        })
    }
}

// === impl InMemoryCharts ===

impl InMemoryCharts {
    pub fn with_chart(mut self, repo: &str, name: &str, version: &str) -> Self {
        self.charts.push(Chart {
            repo: repo.to_string(),
            meta: ChartMeta {
                name: name.to_string(),
                version: version.to_string(),
            },
            archive: Default::default(),
        });
        self
    }
}

#[async_trait::async_trait]
impl ChartRepository for InMemoryCharts {
    /// Without a version, the last chart added under the name is returned
    async fn load(&self, repo: &str, name: &str, version: Option<&str>) -> Result<Chart, Error> {
        self.charts
            .iter()
            .rev()
            .find(|c| {
                c.repo == repo
                    && c.meta.name == name
                    && version.is_none_or(|v| c.meta.version == v)
            })
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chart {repo}/{name}")))
    }
}

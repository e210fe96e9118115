//! Release list filtering

use super::helm::{Release, ReleaseStatus};
use crate::Error;
use ahash::AHashMap;
use regex::Regex;

/// Status flags of a release list request
///
/// With no flag set, deployed, failed and pending-install releases are listed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub all: bool,
    pub deployed: bool,
    pub deleted: bool,
    pub deleting: bool,
    pub failed: bool,
    pub pending: bool,
    pub superseded: bool,
}

/// Filters a release listing
#[derive(Clone, Debug)]
pub struct ReleaseFilter {
    statuses: Vec<ReleaseStatus>,
    name: Option<Regex>,
}

// === impl StatusFlags ===

impl StatusFlags {
    pub fn statuses(&self) -> Vec<ReleaseStatus> {
        if self.all {
            return ReleaseStatus::ALL.to_vec();
        }
        let mut statuses = Vec::new();
        if self.deployed {
            statuses.push(ReleaseStatus::Deployed);
        }
        if self.deleted {
            statuses.push(ReleaseStatus::Deleted);
        }
        if self.deleting {
            statuses.push(ReleaseStatus::Deleting);
        }
        if self.failed {
            statuses.push(ReleaseStatus::Failed);
        }
        if self.pending {
            statuses.extend([
                ReleaseStatus::PendingInstall,
                ReleaseStatus::PendingUpgrade,
                ReleaseStatus::PendingRollback,
            ]);
        }
        if self.superseded {
            statuses.push(ReleaseStatus::Superseded);
        }
        if statuses.is_empty() {
            statuses = vec![
                ReleaseStatus::Deployed,
                ReleaseStatus::Failed,
                ReleaseStatus::PendingInstall,
            ];
        }
        statuses
    }
}

// === impl ReleaseFilter ===

impl ReleaseFilter {
    /// Builds a filter from status flags and an optional name pattern
    pub fn new(flags: &StatusFlags, name: Option<&str>) -> Result<Self, Error> {
        let name = name
            .filter(|n| !n.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|error| Error::BadRequest(format!("invalid release filter: {error}")))?;
        Ok(Self {
            statuses: flags.statuses(),
            name,
        })
    }

    pub fn keeps(&self, release: &Release) -> bool {
        self.statuses.contains(&release.status())
            && self.name.as_ref().is_none_or(|re| re.is_match(&release.name))
    }

    /// Keeps matching releases and only the highest version of each release name
    ///
    /// The result is ordered by name.
    pub fn apply(&self, releases: impl IntoIterator<Item = Release>) -> Vec<Release> {
        let mut latest = AHashMap::<String, Release>::new();
        for release in releases.into_iter().filter(|r| self.keeps(r)) {
            match latest.get(&release.name) {
                Some(seen) if seen.version >= release.version => {}
                _ => {
                    latest.insert(release.name.clone(), release);
                }
            }
        }
        let mut releases = latest.into_values().collect::<Vec<_>>();
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        releases
    }
}

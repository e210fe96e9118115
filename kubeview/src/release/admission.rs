//! Admission rules checked before a release is installed or upgraded

use super::helm::{ChartRef, Release, ReleaseStatus};
use crate::Error;

/// Charts from the infra repository may back at most one live release per chart name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfraChartRule {
    infra_repo: String,
}

impl InfraChartRule {
    pub fn new(infra_repo: impl Into<String>) -> Self {
        Self {
            infra_repo: infra_repo.into(),
        }
    }

    pub fn applies_to(&self, chart: &ChartRef) -> bool {
        chart.repo == self.infra_repo
    }

    /// Rejects `chart` if a release other than `release` already uses a chart of the same name
    ///
    /// Deleted releases are ignored.
    pub fn admit(
        &self,
        chart: &ChartRef,
        release: Option<&str>,
        existing: &[Release],
    ) -> Result<(), Error> {
        if !self.applies_to(chart) {
            return Ok(());
        }
        let conflict = existing.iter().find(|r| {
            r.chart.name == chart.name
                && Some(r.name.as_str()) != release
                && r.status() != ReleaseStatus::Deleted
        });
        match conflict {
            Some(r) => Err(Error::BadRequest(format!(
                "chart {chart} is already installed as release {} in namespace {}",
                r.name, r.namespace
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::helm::{ChartMeta, Info};

    fn release(name: &str, chart: &str, status: ReleaseStatus) -> Release {
        Release {
            name: name.to_string(),
            namespace: "infra".to_string(),
            version: 1,
            chart: ChartMeta {
                name: chart.to_string(),
                version: "1.0.0".to_string(),
            },
            info: Some(Info {
                status,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn infra_charts_are_unique() {
        let rule = InfraChartRule::new("infra");
        let existing = [
            release("cache", "redis", ReleaseStatus::Deployed),
            release("old-db", "postgres", ReleaseStatus::Deleted),
        ];
        let redis = "infra/redis".parse().unwrap();
        assert_eq!(
            rule.admit(&redis, None, &existing).unwrap_err().kind(),
            "bad-request"
        );
        // The release being upgraded does not conflict with itself.
        assert!(rule.admit(&redis, Some("cache"), &existing).is_ok());

        assert!(rule.admit(&"infra/postgres".parse().unwrap(), None, &existing).is_ok());
        assert!(rule.admit(&"stable/redis".parse().unwrap(), None, &existing).is_ok());
    }
}

//! A chart repository backed by a local directory
//!
//! Each repository is a subdirectory of the root holding packaged charts named the way
//! `helm package` names them: `<root>/<repo>/<chart>-<version>.tgz`.

use super::helm::{Chart, ChartMeta, ChartRepository};
use crate::Error;
use std::{
    cmp::Ordering,
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

const ARCHIVE_SUFFIX: &str = ".tgz";

/// Serves packaged charts from a directory tree
#[derive(Clone, Debug)]
pub struct LocalCharts {
    root: PathBuf,
}

// === impl LocalCharts ===

impl LocalCharts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the highest packaged version of a chart
    async fn latest(&self, repo: &Path, name: &str) -> Result<Option<String>, Error> {
        let mut entries = match tokio::fs::read_dir(repo).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(repo, e)),
        };
        let mut latest = None::<String>;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(repo, e))? {
            let file = entry.file_name();
            let Some(version) = file.to_str().and_then(|f| version_of(f, name)) else {
                continue;
            };
            if latest
                .as_deref()
                .is_none_or(|l| cmp_versions(version, l) == Ordering::Greater)
            {
                latest = Some(version.to_string());
            }
        }
        Ok(latest)
    }
}

#[async_trait::async_trait]
impl ChartRepository for LocalCharts {
    /// Without a version, the highest packaged version is returned
    async fn load(&self, repo: &str, name: &str, version: Option<&str>) -> Result<Chart, Error> {
        let not_found = || Error::NotFound(format!("chart {repo}/{name}"));
        if [repo, name].iter().any(|s| !is_path_segment(s))
            || version.is_some_and(|v| !is_path_segment(v))
        {
            return Err(not_found());
        }

        let dir = self.root.join(repo);
        let version = match version {
            Some(v) => v.to_string(),
            None => self.latest(&dir, name).await?.ok_or_else(not_found)?,
        };
        let path = dir.join(format!("{name}-{version}{ARCHIVE_SUFFIX}"));
        let archive = match tokio::fs::read(&path).await {
            Ok(archive) => archive,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(io_error(&path, e)),
        };
        debug!(path = %path.display(), bytes = archive.len(), "loaded chart");

        Ok(Chart {
            repo: repo.to_string(),
            meta: ChartMeta {
                name: name.to_string(),
                version,
            },
            archive: archive.into(),
        })
    }
}

fn io_error(path: &Path, error: io::Error) -> Error {
    Error::Internal(format!("{}: {error}", path.display()))
}

fn is_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

/// Extracts the version from `<name>-<version>.tgz`
///
/// Versions start with a digit, so `web-api-1.0.0.tgz` is not a version of `web`.
fn version_of<'f>(file: &'f str, name: &str) -> Option<&'f str> {
    let version = file
        .strip_prefix(name)?
        .strip_prefix('-')?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    version
        .starts_with(|c: char| c.is_ascii_digit())
        .then_some(version)
}

/// Orders dotted versions numerically, falling back to text for non-numeric parts
fn cmp_versions(a: &str, b: &str) -> Ordering {
    let mut a = a.split(['.', '-', '+']);
    let mut b = b.split(['.', '-', '+']);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo(charts: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::with_prefix("kubeview-charts").expect("failed to create directory");
        for (repo, file) in charts {
            let path = dir.path().join(repo);
            std::fs::create_dir_all(&path).expect("failed to create repository");
            std::fs::write(path.join(file), file.as_bytes()).expect("failed to write chart");
        }
        dir
    }

    #[tokio::test]
    async fn loads_requested_versions() {
        let dir = repo(&[("stable", "web-1.0.0.tgz"), ("stable", "web-1.2.0.tgz")]);
        let charts = LocalCharts::new(dir.path());

        let chart = charts.load("stable", "web", Some("1.0.0")).await.unwrap();
        assert_eq!(chart.repo, "stable");
        assert_eq!(chart.meta.name, "web");
        assert_eq!(chart.meta.version, "1.0.0");
        assert_eq!(&chart.archive[..], b"web-1.0.0.tgz");

        let err = charts.load("stable", "web", Some("2.0.0")).await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
        let err = charts.load("infra", "web", None).await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[tokio::test]
    async fn loads_the_highest_version_by_default() {
        let dir = repo(&[
            ("stable", "web-1.9.0.tgz"),
            ("stable", "web-1.10.0.tgz"),
            ("stable", "web-api-9.0.0.tgz"),
            ("stable", "web-2.0.0.tar"),
            ("infra", "web-3.0.0.tgz"),
        ]);
        let charts = LocalCharts::new(dir.path());

        let chart = charts.load("stable", "web", None).await.unwrap();
        assert_eq!(chart.meta.version, "1.10.0");
        let chart = charts.load("stable", "web-api", None).await.unwrap();
        assert_eq!(chart.meta.version, "9.0.0");
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_root() {
        let dir = repo(&[("stable", "web-1.0.0.tgz")]);
        let charts = LocalCharts::new(dir.path().join("stable"));

        for (repo, name, version) in [
            ("..", "stable", None),
            ("..", "stable/web", Some("1.0.0")),
            ("x", "web", Some("../../stable/web-1.0.0")),
        ] {
            let err = charts.load(repo, name, version).await.unwrap_err();
            assert_eq!(err.kind(), "not-found", "{repo}/{name}");
        }
    }

    #[test]
    fn orders_versions_numerically() {
        assert_eq!(cmp_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(cmp_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(cmp_versions("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(cmp_versions("2.0.0-rc.1", "2.0.0-beta.2"), Ordering::Greater);
    }
}

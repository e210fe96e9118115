#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::Parser;
use kubeview::{
    api::{Api, ApiMetrics, ApiSettings},
    registry::Registry,
    release::{local::LocalCharts, memory::InMemoryHelm, HelmClient, ReleaseSettings, Releases},
    AdminArgs, ClientArgs, LogFilter, LogFormat, Runtime, ServerArgs,
};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Clone, Parser)]
#[clap(version, about = "Serves aggregated, tenant-scoped views of Kubernetes clusters")]
struct Args {
    /// The tracing filter used for logs
    #[clap(long, env = "KUBEVIEW_LOG", default_value = "kubeview=info,warn")]
    log_level: String,

    /// The logging format
    #[clap(long, value_enum, default_value = "plain")]
    log_format: LogFormat,

    #[clap(flatten)]
    client: ClientArgs,

    #[clap(flatten)]
    admin: AdminArgs,

    #[clap(flatten)]
    server: ServerArgs,

    /// Bounds every API request
    #[clap(long, default_value = "30s")]
    request_timeout: Timeout,

    /// Bounds release installs and upgrades
    #[clap(long, default_value = "1500s")]
    release_timeout: Timeout,

    /// The delay between retries after a watch fails repeatedly
    #[clap(long, default_value = "5s")]
    watch_error_delay: Timeout,

    /// Holds packaged charts as `<repo>/<chart>-<version>.tgz`
    #[clap(long, env = "KUBEVIEW_CHARTS_DIR", default_value = "charts")]
    charts_dir: PathBuf,

    /// Charts from this repository may back at most one release each
    #[clap(long, default_value = "infra")]
    infra_repo: String,

    /// Binds namespace deployers to cluster-admin when a dedicated role cannot be created
    #[clap(long)]
    allow_cluster_admin_fallback: bool,

    /// Keeps releases in process memory instead of leaving the release routes unavailable
    #[clap(long)]
    in_memory_releases: bool,
}

#[derive(Copy, Clone, Debug)]
struct Timeout(Duration);

#[derive(Copy, Clone, Debug, thiserror::Error)]
#[error("invalid duration")]
struct InvalidTimeout;

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        client,
        admin,
        server,
        request_timeout: Timeout(request_timeout),
        release_timeout: Timeout(release_timeout),
        watch_error_delay: Timeout(watch_error_delay),
        charts_dir,
        infra_repo,
        allow_cluster_admin_fallback,
        in_memory_releases,
    } = Args::parse();

    let mut rt = Runtime::builder()
        .with_log(LogFilter::try_new(log_level)?, log_format)
        .with_admin(admin)
        .with_client(client)
        .with_fixed_delay_on_error(watch_error_delay);
    if in_memory_releases {
        rt = rt.with_helm(|_| Arc::new(InMemoryHelm::default()) as Arc<dyn HelmClient>);
    }
    let mut rt = rt.with_server(server).build().await?;

    let metrics = ApiMetrics::register(rt.metrics_registry());
    tracing::debug!(path = %charts_dir.display(), "serving charts");
    let releases = Releases::new(
        Arc::new(LocalCharts::new(charts_dir)),
        ReleaseSettings {
            infra_repo,
            timeout: release_timeout,
            allow_cluster_admin_fallback,
            setup_namespaces: true,
        },
    );
    let clusters = rt.clusters();
    tracing::info!(clusters = clusters.len(), addr = %rt.server_addr(), "serving");
    let api = Api::new(
        clusters,
        Registry::default(),
        releases,
        ApiSettings { request_timeout },
        metrics,
    );

    // Block the main thread on the shutdown signal. Once it fires, wait for the API server and
    // watches to complete before exiting.
    if rt.spawn_server(api).run().await.is_err() {
        bail!("aborted");
    }

    Ok(())
}

// === impl Timeout ===

impl std::str::FromStr for Timeout {
    type Err = InvalidTimeout;

    fn from_str(s: &str) -> Result<Self, InvalidTimeout> {
        let re = regex::Regex::new(r"^\s*(\d+)(ms|s|m|h)?\s*$").map_err(|_| InvalidTimeout)?;
        let cap = re.captures(s).ok_or(InvalidTimeout)?;
        let magnitude = cap[1].parse().map_err(|_| InvalidTimeout)?;
        let t = match cap.get(2).map(|m| m.as_str()) {
            None if magnitude == 0 => Duration::from_millis(0),
            Some("ms") => Duration::from_millis(magnitude),
            Some("s") => Duration::from_secs(magnitude),
            Some("m") => Duration::from_secs(magnitude * 60),
            Some("h") => Duration::from_secs(magnitude * 60 * 60),
            _ => return Err(InvalidTimeout),
        };
        Ok(Self(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timeouts() {
        assert_eq!("30s".parse::<Timeout>().unwrap().0, Duration::from_secs(30));
        assert_eq!("2m".parse::<Timeout>().unwrap().0, Duration::from_secs(120));
        assert_eq!("250ms".parse::<Timeout>().unwrap().0, Duration::from_millis(250));
        assert_eq!("0".parse::<Timeout>().unwrap().0, Duration::ZERO);
        assert!("30".parse::<Timeout>().is_err());
        assert!("soon".parse::<Timeout>().is_err());
    }

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["kubeview"]).unwrap();
        assert_eq!(args.request_timeout.0, Duration::from_secs(30));
        assert_eq!(args.release_timeout.0, Duration::from_secs(1500));
        assert_eq!(args.charts_dir, PathBuf::from("charts"));
        assert_eq!(args.client.cluster_name, "default");
        assert_eq!(args.server.server_addr.port(), 8443);
        assert!(!args.allow_cluster_admin_fallback);
    }

    #[test]
    fn parses_charts_dir() {
        let args = Args::try_parse_from(["kubeview", "--charts-dir", "/srv/charts"]).unwrap();
        assert_eq!(args.charts_dir, PathBuf::from("/srv/charts"));
    }
}

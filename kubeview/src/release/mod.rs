//! The Helm release facade
//!
//! [`Releases`] wraps a cluster's [`HelmClient`] with tenant scoping, value merging, admission and
//! namespace setup. Reading a single release also assembles its object graph: every pod, service,
//! ingress and stateful set in the release's namespace labeled `release=<name>`. The graph is
//! rebuilt from the caches on every read.

use crate::{
    cache::Selector,
    context::RequestContext,
    dataselect::{DataSelectQuery, Describe, Properties, Property},
    meta::ListResponse,
    namespace::NamespaceQuery,
    resource::{
        self, ingress::IngressView, pod::PodView, service::ServiceView,
        statefulset::StatefulSetView,
    },
    setup::Setup,
    Error,
};
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Event, Pod, Service},
    networking::v1::Ingress,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

mod admission;
mod filter;
mod helm;
pub mod local;
pub mod memory;
pub mod values;

pub use self::{
    admission::InfraChartRule,
    filter::{ReleaseFilter, StatusFlags},
    helm::{
        Chart, ChartMeta, ChartRef, ChartRepository, HelmClient, Info, InstallOptions, Release,
        ReleaseStatus, RollbackOptions, UpgradeOptions,
    },
};

/// The label tying objects to the release that created them
pub const RELEASE_LABEL: &str = "release";

/// Settings shared by every release operation
#[derive(Clone, Debug)]
pub struct ReleaseSettings {
    /// The repository whose charts may back at most one release each
    pub infra_repo: String,
    /// The timeout passed to installs and upgrades when a request sets none
    pub timeout: Duration,
    pub allow_cluster_admin_fallback: bool,
    /// Whether installs and upgrades first ensure the target namespace's deployer account
    pub setup_namespaces: bool,
}

/// The release facade
#[derive(Clone)]
pub struct Releases {
    charts: Arc<dyn ChartRepository>,
    admission: InfraChartRule,
    settings: ReleaseSettings,
}

/// The parameters of a release list request
#[derive(Clone, Debug, Default)]
pub struct ReleaseListRequest {
    pub namespaces: NamespaceQuery,
    pub flags: StatusFlags,
    /// A regular expression over release names
    pub filter: Option<String>,
    pub query: DataSelectQuery,
}

/// The body of an install or upgrade
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReleaseRequest {
    /// `repo/chart`
    pub chart: String,
    pub version: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    /// A YAML document
    pub values: String,
    /// `dotted.path=value` assignments applied over `values`
    pub sets: Vec<String>,
    pub dry_run: bool,
    /// Seconds
    pub timeout: Option<u64>,
    pub reuse_values: bool,
    pub reset_values: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RollbackRequest {
    pub revision: i32,
    pub description: Option<String>,
}

/// A release list row
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseView {
    pub name: String,
    pub namespace: String,
    pub version: i32,
    pub chart: ChartMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
}

/// A release and the objects it owns
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReleaseGraph {
    pub release: Release,
    pub pods: Vec<PodView>,
    pub services: Vec<ServiceView>,
    pub ingresses: Vec<IngressView>,
    pub statefulsets: Vec<StatefulSetView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub revision: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::Time>,
    pub status: ReleaseStatus,
    /// `name-version`
    pub chart: String,
    pub description: String,
}

// === impl ReleaseSettings ===

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            infra_repo: "infra".to_string(),
            timeout: Duration::from_secs(1500),
            allow_cluster_admin_fallback: false,
            setup_namespaces: true,
        }
    }
}

// === impl ReleaseView ===

impl From<Release> for ReleaseView {
    fn from(r: Release) -> Self {
        Self {
            name: r.name,
            namespace: r.namespace,
            version: r.version,
            chart: r.chart,
            info: r.info,
        }
    }
}

impl Describe for ReleaseView {
    fn describe(&self) -> Properties {
        let info = self.info.as_ref();
        Properties::default()
            .with(Property::Name, self.name.as_str())
            .with(Property::Namespace, self.namespace.as_str())
            .with_opt(
                Property::CreationTimestamp,
                info.and_then(|i| i.last_deployed.as_ref()),
            )
            .with_opt(Property::Status, info.map(|i| i.status.as_str()))
            .with(Property::Chart, self.chart.name.as_str())
            .with(Property::Version, i64::from(self.version))
    }
}

// === impl Releases ===

impl Releases {
    pub fn new(charts: Arc<dyn ChartRepository>, settings: ReleaseSettings) -> Self {
        Self {
            charts,
            admission: InfraChartRule::new(settings.infra_repo.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &ReleaseSettings {
        &self.settings
    }

    /// Lists the latest matching revision of each release visible to the caller
    pub async fn list(
        &self,
        ctx: &RequestContext,
        req: &ReleaseListRequest,
    ) -> Result<ListResponse<ReleaseView>, Error> {
        let filter = ReleaseFilter::new(&req.flags, req.filter.as_deref())?;
        let helm = ctx.cluster().helm()?;
        let namespace = Some(req.namespaces.to_request_param()).filter(|ns| !ns.is_empty());
        let releases = helm.list_releases(namespace).await?;
        let rows = filter
            .apply(
                releases
                    .into_iter()
                    .filter(|r| req.namespaces.matches(Some(&r.namespace))),
            )
            .into_iter()
            .map(ReleaseView::from);
        Ok(ListResponse::new(req.query.select(rows)))
    }

    /// Reads a release and assembles the objects labeled with its name
    ///
    /// A failed status lookup is tolerated: the release is returned with the info it was listed
    /// with, if any.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
    ) -> Result<ReleaseGraph, Error> {
        let mut release = self.content(ctx, namespace, name).await?;
        match ctx.cluster().helm()?.release_status(name).await {
            Ok(info) => release.info = Some(info),
            Err(error) => info!(release = %name, %error, "failed to read release status"),
        }

        let channels = ctx.channels_in(namespace);
        let selector = Selector::eq(RELEASE_LABEL, name);
        let pods = channels.open_selected::<Pod>(selector.clone());
        let services = channels.open_selected::<Service>(selector.clone());
        let ingresses = channels.open_selected::<Ingress>(selector.clone());
        let statefulsets = channels.open_selected::<StatefulSet>(selector);
        let events = channels.open::<Event>();

        let pods = pods.recv().await?;
        let services = services.recv().await?;
        let ingresses = ingresses.recv().await?;
        let statefulsets = statefulsets.recv().await?;
        let events = events.recv().await?;
        channels.close().await;
        debug!(
            pods = pods.len(),
            services = services.len(),
            ingresses = ingresses.len(),
            statefulsets = statefulsets.len(),
            "assembled release graph"
        );

        let cluster = ctx.cluster_meta();
        Ok(ReleaseGraph {
            release,
            pods: PodView::with_warnings(&pods, &events, cluster),
            services: services
                .iter()
                .map(|s| ServiceView::new(s, cluster))
                .collect(),
            ingresses: ingresses
                .iter()
                .map(|i| IngressView::new(i, cluster))
                .collect(),
            statefulsets: statefulsets
                .iter()
                .map(|sts| {
                    let owned = resource::controlled_pods(&pods, resource::uid_of(&sts.metadata));
                    StatefulSetView::new(sts, &owned, &events, cluster)
                })
                .collect(),
        })
    }

    /// Installs a chart
    pub async fn create(
        &self,
        ctx: &RequestContext,
        req: &ReleaseRequest,
    ) -> Result<ReleaseView, Error> {
        let chart_ref = req.chart.parse::<ChartRef>()?;
        let namespace = req
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| ctx.identity().default_namespace.clone());
        ctx.authorize_namespace(&namespace)?;
        let helm = ctx.cluster().helm()?;

        let chart = self
            .charts
            .load(&chart_ref.repo, &chart_ref.name, req.version.as_deref())
            .await?;
        if self.admission.applies_to(&chart_ref) {
            let existing = helm.list_releases(None).await?;
            self.admission.admit(&chart_ref, None, &existing)?;
        }
        let values = values::merge(&req.values, &req.sets)?;

        if self.settings.setup_namespaces && !req.dry_run {
            self.setup(ctx).ensure_namespace(&namespace).await?;
        }

        let opts = InstallOptions {
            name: req.name.clone().filter(|n| !n.is_empty()),
            namespace,
            values,
            reuse_name: true,
            disable_hooks: true,
            wait: false,
            dry_run: req.dry_run,
            timeout: self.timeout(req),
        };
        let release = helm.install(&chart, &opts).await?;
        info!(
            release = %release.name,
            namespace = %release.namespace,
            chart = %chart_ref,
            "installed"
        );
        Ok(release.into())
    }

    /// Upgrades a release to the requested chart and values
    pub async fn upgrade(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
        req: &ReleaseRequest,
    ) -> Result<ReleaseView, Error> {
        let chart_ref = req.chart.parse::<ChartRef>()?;
        self.content(ctx, namespace, name).await?;
        let helm = ctx.cluster().helm()?;

        let chart = self
            .charts
            .load(&chart_ref.repo, &chart_ref.name, req.version.as_deref())
            .await?;
        if self.admission.applies_to(&chart_ref) {
            let existing = helm.list_releases(None).await?;
            self.admission.admit(&chart_ref, Some(name), &existing)?;
        }
        if self.settings.setup_namespaces && !req.dry_run {
            self.setup(ctx).ensure_namespace(namespace).await?;
        }

        let opts = UpgradeOptions {
            values: values::merge(&req.values, &req.sets)?,
            reuse_values: req.reuse_values,
            reset_values: req.reset_values,
            disable_hooks: true,
            wait: false,
            dry_run: req.dry_run,
            timeout: self.timeout(req),
        };
        let release = helm.upgrade(name, &chart, &opts).await?;
        info!(release = %name, %namespace, version = release.version, "upgraded");
        Ok(release.into())
    }

    /// Rolls a release back to an earlier revision without running hooks
    pub async fn rollback(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
        req: &RollbackRequest,
    ) -> Result<ReleaseView, Error> {
        if req.revision <= 0 {
            return Err(Error::BadRequest(format!(
                "invalid revision {}",
                req.revision
            )));
        }
        self.content(ctx, namespace, name).await?;
        let opts = RollbackOptions {
            revision: req.revision,
            description: req.description.clone(),
            disable_hooks: true,
            recreate: true,
            wait: false,
        };
        let release = ctx.cluster().helm()?.rollback(name, &opts).await?;
        info!(release = %name, %namespace, revision = req.revision, "rolled back");
        Ok(release.into())
    }

    /// Returns every revision of a release, newest first
    pub async fn history(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<HistoryEntry>, Error> {
        self.content(ctx, namespace, name).await?;
        let mut revisions = ctx.cluster().helm()?.release_history(name).await?;
        revisions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(revisions
            .into_iter()
            .map(|r| {
                let info = r.info.unwrap_or_default();
                HistoryEntry {
                    revision: r.version,
                    updated: info.last_deployed,
                    status: info.status,
                    chart: format!("{}-{}", r.chart.name, r.chart.version),
                    description: info.description,
                }
            })
            .collect())
    }

    /// Deletes and purges a release
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
    ) -> Result<ReleaseView, Error> {
        self.content(ctx, namespace, name).await?;
        let release = ctx.cluster().helm()?.delete(name, true).await?;
        info!(release = %name, %namespace, "deleted");
        Ok(release.into())
    }

    /// Reads a release the caller may access in `namespace`
    async fn content(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        name: &str,
    ) -> Result<Release, Error> {
        ctx.authorize_namespace(namespace)?;
        let release = ctx.cluster().helm()?.release_content(name).await?;
        if release.namespace != namespace {
            return Err(Error::not_found("release", Some(namespace), name));
        }
        Ok(release)
    }

    fn setup(&self, ctx: &RequestContext) -> Setup {
        Setup::new(ctx.cluster().client())
            .with_cluster_admin_fallback(self.settings.allow_cluster_admin_fallback)
    }

    /// The install or upgrade timeout for a request; unset and zero timeouts use the default
    pub fn timeout(&self, req: &ReleaseRequest) -> Duration {
        req.timeout
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.settings.timeout)
    }
}

impl std::fmt::Debug for Releases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Releases")
            .field("admission", &self.admission)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{memory::*, *};
    use crate::{
        cache::{IndexerCache, Writers},
        cluster::{Cluster, ClusterMeta},
        context::Identity,
        resource::fixtures::*,
    };
    use hyper::{Request, Response, StatusCode};
    use kube_client::client::Body;
    use tokio::time;

    type MockHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn release(name: &str, ns: &str, version: i32, status: ReleaseStatus) -> Release {
        Release {
            name: name.to_string(),
            namespace: ns.to_string(),
            version,
            chart: ChartMeta {
                name: "redis".to_string(),
                version: "1.0.0".to_string(),
            },
            info: Some(Info {
                status,
                description: format!("revision {version}"),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn context(writers: &Writers, identity: Identity, helm: Arc<InMemoryHelm>) -> RequestContext {
        context_with_upstream(writers, identity, helm).0
    }

    fn context_with_upstream(
        writers: &Writers,
        identity: Identity,
        helm: Arc<InMemoryHelm>,
    ) -> (RequestContext, MockHandle) {
        let cache = Arc::new(IndexerCache::from_writers("test", writers));
        let (mock, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube_client::Client::new(mock, "default");
        let cluster = Cluster::new(ClusterMeta::new("test"), cache, client).with_helm(helm);
        (RequestContext::new(Arc::new(cluster), identity), handle)
    }

    fn releases() -> Releases {
        let charts = InMemoryCharts::default()
            .with_chart("infra", "redis", "1.0.0")
            .with_chart("stable", "web", "2.0.0");
        Releases::new(
            Arc::new(charts),
            ReleaseSettings {
                setup_namespaces: false,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn lists_visible_releases() {
        let helm = Arc::new(
            InMemoryHelm::default()
                .with_release(release("cache", "alice", 1, ReleaseStatus::Deployed))
                .with_release(release("other", "bob", 1, ReleaseStatus::Deployed)),
        );
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm);
        let req = ReleaseListRequest {
            namespaces: NamespaceQuery::one("alice"),
            ..Default::default()
        };
        let rsp = releases().list(&ctx, &req).await.unwrap();
        assert_eq!(rsp.total, 1);
        assert_eq!(rsp.items[0].name, "cache");
    }

    #[tokio::test]
    async fn installs_with_merged_values_and_fixed_options() {
        let helm = Arc::new(InMemoryHelm::default());
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm.clone());
        let req = ReleaseRequest {
            chart: "stable/web".to_string(),
            name: Some("site".to_string()),
            values: "replicas: 1\n".to_string(),
            sets: vec!["replicas=2".to_string()],
            ..Default::default()
        };
        let created = releases().create(&ctx, &req).await.unwrap();
        assert_eq!(created.namespace, "alice");
        assert_eq!(created.version, 1);

        let installs = helm.installs();
        assert_eq!(installs.len(), 1);
        let opts = &installs[0];
        assert!(opts.reuse_name && opts.disable_hooks && !opts.wait);
        assert_eq!(opts.timeout, Duration::from_secs(1500));
        assert_eq!(opts.values, serde_json::json!({ "replicas": 2 }));
    }

    #[tokio::test]
    async fn rejects_duplicate_infra_charts() {
        let cache = release("cache", "bob", 1, ReleaseStatus::Deployed);
        let helm = Arc::new(InMemoryHelm::default().with_release(cache));
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm.clone());
        let req = ReleaseRequest {
            chart: "infra/redis".to_string(),
            ..Default::default()
        };
        let err = releases().create(&ctx, &req).await.unwrap_err();
        assert_eq!(err.kind(), "bad-request");
        assert!(helm.installs().is_empty());
    }

    #[tokio::test]
    async fn creates_in_foreign_namespaces_are_forbidden() {
        let helm = Arc::new(InMemoryHelm::default());
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm);
        let req = ReleaseRequest {
            chart: "stable/web".to_string(),
            namespace: Some("bob".to_string()),
            ..Default::default()
        };
        assert_eq!(
            releases().create(&ctx, &req).await.unwrap_err().kind(),
            "forbidden"
        );
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let helm = Arc::new(
            InMemoryHelm::default()
                .with_release(release("cache", "alice", 1, ReleaseStatus::Superseded))
                .with_release(release("cache", "alice", 3, ReleaseStatus::Deployed))
                .with_release(release("cache", "alice", 2, ReleaseStatus::Superseded)),
        );
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm);
        let history = releases().history(&ctx, "alice", "cache").await.unwrap();
        let revisions = history.iter().map(|h| h.revision).collect::<Vec<_>>();
        assert_eq!(revisions, [3, 2, 1]);
        assert_eq!(history[0].chart, "redis-1.0.0");
        assert_eq!(history[0].status, ReleaseStatus::Deployed);
    }

    #[tokio::test]
    async fn rollback_creates_a_new_revision() {
        let helm = Arc::new(
            InMemoryHelm::default()
                .with_release(release("cache", "alice", 1, ReleaseStatus::Superseded))
                .with_release(release("cache", "alice", 2, ReleaseStatus::Deployed)),
        );
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm);
        let facade = releases();
        let req = RollbackRequest {
            revision: 1,
            description: None,
        };
        let rolled = facade.rollback(&ctx, "alice", "cache", &req).await.unwrap();
        assert_eq!(rolled.version, 3);

        let invalid = RollbackRequest::default();
        assert_eq!(
            facade
                .rollback(&ctx, "alice", "cache", &invalid)
                .await
                .unwrap_err()
                .kind(),
            "bad-request"
        );
    }

    #[tokio::test]
    async fn releases_are_read_in_their_own_namespace() {
        let cache = release("cache", "alice", 1, ReleaseStatus::Deployed);
        let helm = Arc::new(InMemoryHelm::default().with_release(cache));
        let ctx = context(&Writers::default(), Identity::admin("root"), helm);
        let err = releases().get(&ctx, "bob", "cache").await.unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[tokio::test]
    async fn graph_tolerates_status_failures() {
        let cache = release("cache", "alice", 1, ReleaseStatus::Deployed);
        let helm = Arc::new(InMemoryHelm::default().with_release(cache));
        helm.set_status_unavailable(true);
        let mut writers = Writers::default();
        for (name, label) in [("cache-0", "cache"), ("unrelated", "other")] {
            let labels = [("release", label)];
            writers.apply(pod(labeled(meta("alice", name), &labels), "Running", true));
        }
        let ctx = context(&writers, Identity::tenant("alice", "alice"), helm);

        let graph = releases().get(&ctx, "alice", "cache").await.unwrap();
        assert_eq!(graph.release.status(), ReleaseStatus::Deployed);
        assert_eq!(graph.pods.len(), 1);
        assert_eq!(graph.pods[0].object_meta.name, "cache-0");
    }

    #[tokio::test]
    async fn upgrades_set_up_the_namespace() {
        let site = release("site", "alice", 1, ReleaseStatus::Deployed);
        let helm = Arc::new(InMemoryHelm::default().with_release(site));
        let identity = Identity::tenant("alice", "alice");
        let (ctx, mut upstream) = context_with_upstream(&Writers::default(), identity, helm);
        let releases = Releases::new(
            Arc::new(InMemoryCharts::default().with_chart("stable", "web", "2.0.0")),
            ReleaseSettings::default(),
        );
        let mut req = ReleaseRequest {
            chart: "stable/web".to_string(),
            dry_run: true,
            ..Default::default()
        };

        // Dry runs leave the namespace alone.
        let planned = releases.upgrade(&ctx, "alice", "site", &req).await.unwrap();
        assert_eq!(planned.version, 2);
        let next = time::timeout(Duration::from_millis(10), upstream.next_request()).await;
        assert!(next.is_err(), "unexpected upstream request");

        let server = tokio::spawn(async move {
            let mut paths = Vec::new();
            for _ in 0..3 {
                let (req, send) = upstream.next_request().await.expect("service not called");
                paths.push(req.uri().path().to_string());
                let status = serde_json::json!({
                    "kind": "Status",
                    "apiVersion": "v1",
                    "status": "Failure",
                    "message": "already exists",
                    "reason": "AlreadyExists",
                    "code": 409,
                });
                send.send_response(
                    Response::builder()
                        .status(StatusCode::CONFLICT)
                        .body(Body::from(serde_json::to_vec(&status).unwrap()))
                        .unwrap(),
                );
            }
            paths
        });
        req.dry_run = false;
        let upgraded = releases.upgrade(&ctx, "alice", "site", &req).await.unwrap();
        assert_eq!(upgraded.version, 2);
        assert_eq!(upgraded.chart.name, "web");
        assert_eq!(
            server.await.unwrap(),
            [
                "/api/v1/namespaces/alice/serviceaccounts",
                "/apis/rbac.authorization.k8s.io/v1/clusterroles",
                "/apis/rbac.authorization.k8s.io/v1/namespaces/alice/rolebindings",
            ]
        );
    }

    #[tokio::test]
    async fn delete_purges_every_revision() {
        let helm = Arc::new(
            InMemoryHelm::default()
                .with_release(release("cache", "alice", 1, ReleaseStatus::Superseded))
                .with_release(release("cache", "alice", 2, ReleaseStatus::Deployed)),
        );
        let ctx = context(&Writers::default(), Identity::tenant("alice", "alice"), helm.clone());
        releases().delete(&ctx, "alice", "cache").await.unwrap();
        assert!(helm.list_releases(None).await.unwrap().is_empty());
    }
}

//! The HTTP surface
//!
//! Every route is scoped to a cluster:
//!
//! - `GET /api/v1/clusters/{cluster}/{plural}` lists a kind; `/{plural}/{namespace}` lists it in
//!   one namespace.
//! - `GET|PUT|DELETE /api/v1/clusters/{cluster}/{plural}/{namespace}/{name}` reads, replaces or
//!   deletes an object. Cluster-scoped kinds use `/{plural}/{name}`.
//! - `POST /api/v1/clusters/{cluster}/{plural}` creates an object.
//! - `POST /api/v1/clusters/{cluster}/_apply` applies a multi-document YAML stream.
//! - `/api/v1/clusters/{cluster}/releases[/{namespace}/{name}[/history|/rollback]]` serves the
//!   release facade.
//!
//! The caller's identity is read from headers set by the fronting identity plane. Every request
//! runs under a deadline and a cancellation token that is cancelled when the request completes or
//! is abandoned.

use crate::{
    cluster::Clusters,
    context::{Identity, RequestContext},
    dataselect::{DataSelectQuery, Paginate},
    namespace::{NamespaceParams, NamespaceQuery},
    registry::Registry,
    release::{ReleaseListRequest, ReleaseRequest, Releases, RollbackRequest, StatusFlags},
    resource::ListRequest,
    verber::Verber,
    Error,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{
    header::{self, HeaderMap, HeaderValue},
    Method, Request, Response, StatusCode,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Unit,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Asserts the caller's user name
pub const USER_HEADER: &str = "x-remote-user";

/// Lists the caller's namespaces, comma-separated; the first is the default
pub const NAMESPACE_HEADER: &str = "x-remote-namespace";

/// Marks the caller as a cluster administrator when `true`
pub const ADMIN_HEADER: &str = "x-remote-admin";

const PREFIX: &str = "/api/v1/clusters/";

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configures request handling
#[derive(Clone, Debug)]
pub struct ApiSettings {
    /// Bounds every request
    ///
    /// Release installs and upgrades run for at least the release timeout.
    pub request_timeout: Duration,
}

/// Serves the HTTP surface over every configured cluster
#[derive(Clone)]
pub struct Api {
    inner: Arc<Inner>,
}

struct Inner {
    clusters: Clusters,
    registry: Registry,
    releases: Releases,
    settings: ApiSettings,
    metrics: ApiMetrics,
}

/// Request counters and latency histograms
#[derive(Clone, Debug)]
pub struct ApiMetrics {
    requests: Family<StatusLabels, Counter>,
    durations: Family<RequestLabels, Histogram>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RequestLabels {
    kind: String,
    verb: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StatusLabels {
    kind: String,
    verb: &'static str,
    status: u16,
}

#[derive(Debug, PartialEq, Eq)]
struct Route {
    cluster: String,
    target: Target,
}

#[derive(Debug, PartialEq, Eq)]
enum Target {
    Apply,
    Releases,
    Release { namespace: String, name: String },
    ReleaseHistory { namespace: String, name: String },
    ReleaseRollback { namespace: String, name: String },
    Kind { kind: String, namespace: Option<String> },
    Object { kind: String, namespace: Option<String>, name: String },
}

/// Decoded query parameters, in request order
#[derive(Debug, Default)]
struct Params(Vec<(String, String)>);

/// A handler's successful result
struct Reply {
    status: StatusCode,
    body: Option<Value>,
}

// === impl ApiSettings ===

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

// === impl Api ===

impl Api {
    pub fn new(
        clusters: Clusters,
        registry: Registry,
        releases: Releases,
        settings: ApiSettings,
        metrics: ApiMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                clusters,
                registry,
                releases,
                settings,
                metrics,
            }),
        }
    }

    /// Serves a request, rendering errors as JSON bodies
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body + Send,
        B::Error: Into<BoxError>,
    {
        let start = time::Instant::now();
        let verb = verb(req.method());

        let route = match self.inner.route(req.uri().path()) {
            Ok(route) => route,
            Err(error) => {
                let rsp = error_response(&error);
                self.inner
                    .metrics
                    .record("unknown", verb, rsp.status(), start.elapsed());
                return rsp;
            }
        };
        let kind = self.inner.kind_label(&route.target);

        let span = info_span!("request", cluster = %route.cluster, %kind, verb);
        let result = self.inner.serve(route, req).instrument(span.clone()).await;
        let rsp = match result {
            Ok(Reply { status, body }) => json_response(status, body),
            Err(error) => {
                span.in_scope(|| {
                    if error.status().is_server_error() {
                        info!(%error, "request failed");
                    } else {
                        debug!(%error, "request rejected");
                    }
                });
                error_response(&error)
            }
        };
        self.inner
            .metrics
            .record(&kind, verb, rsp.status(), start.elapsed());
        rsp
    }
}

impl<B> tower::Service<Request<B>> for Api
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let api = self.clone();
        Box::pin(async move { Ok(api.handle(req).await) })
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("clusters", &self.inner.clusters.len())
            .field("registry", &self.inner.registry)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

// === impl Inner ===

impl Inner {
    fn route(&self, path: &str) -> Result<Route, Error> {
        let not_found = || Error::NotFound(format!("route {path}"));
        let rest = path.strip_prefix(PREFIX).ok_or_else(not_found)?;
        let segments = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let (cluster, segments) = segments.split_first().ok_or_else(not_found)?;

        let target = match segments {
            [apply] if apply == "_apply" => Target::Apply,
            [releases] if releases == "releases" => Target::Releases,
            [releases, namespace, name] if releases == "releases" => Target::Release {
                namespace: namespace.clone(),
                name: name.clone(),
            },
            [releases, namespace, name, history]
                if releases == "releases" && history == "history" =>
            {
                Target::ReleaseHistory {
                    namespace: namespace.clone(),
                    name: name.clone(),
                }
            }
            [releases, namespace, name, rollback]
                if releases == "releases" && rollback == "rollback" =>
            {
                Target::ReleaseRollback {
                    namespace: namespace.clone(),
                    name: name.clone(),
                }
            }
            [kind] => Target::Kind {
                kind: kind.clone(),
                namespace: None,
            },
            [kind, second] if self.registry.is_cluster_scoped(self.plural(kind)) => Target::Object {
                kind: kind.clone(),
                namespace: None,
                name: second.clone(),
            },
            [kind, namespace] => Target::Kind {
                kind: kind.clone(),
                namespace: Some(namespace.clone()),
            },
            [kind, namespace, name] => Target::Object {
                kind: kind.clone(),
                namespace: Some(namespace.clone()),
                name: name.clone(),
            },
            _ => return Err(not_found()),
        };
        Ok(Route {
            cluster: cluster.clone(),
            target,
        })
    }

    fn plural<'a>(&self, kind: &'a str) -> &'a str {
        match self.registry.get(kind) {
            Ok(adapter) => adapter.plural(),
            Err(_) => kind,
        }
    }

    /// Bounds metric label cardinality to the registered kinds
    fn kind_label(&self, target: &Target) -> String {
        match target {
            Target::Apply => "_apply".to_string(),
            Target::Releases
            | Target::Release { .. }
            | Target::ReleaseHistory { .. }
            | Target::ReleaseRollback { .. } => "releases".to_string(),
            Target::Kind { kind, .. } | Target::Object { kind, .. } => {
                match self.registry.get(kind) {
                    Ok(adapter) => adapter.plural().to_string(),
                    Err(_) => "unknown".to_string(),
                }
            }
        }
    }

    async fn serve<B>(&self, route: Route, req: Request<B>) -> Result<Reply, Error>
    where
        B: hyper::body::Body + Send,
        B::Error: Into<BoxError>,
    {
        let identity = identity(req.headers())?;
        let cluster = self.clusters.get(&route.cluster)?;
        let params = Params::parse(req.uri().query());
        let method = req.method().clone();
        let body = read_body(req.into_body()).await?;

        let cancel = CancellationToken::new();
        // Abandoned requests cancel their producers.
        let _guard = cancel.clone().drop_guard();
        let ctx = RequestContext::new(cluster, identity).with_cancel(cancel);

        match route.target {
            Target::Releases if method == Method::POST => {
                let mut req = json_body::<ReleaseRequest>(&body)?;
                if req.namespace.is_none() {
                    req.namespace = params.get("namespace").map(str::to_string);
                }
                let timeout = self.release_timeout(&req);
                let created = self.deadline(timeout, self.releases.create(&ctx, &req)).await?;
                Reply::json(StatusCode::CREATED, created)
            }
            Target::Release { namespace, name } if method == Method::PUT => {
                let req = json_body::<ReleaseRequest>(&body)?;
                let timeout = self.release_timeout(&req);
                let upgraded = self
                    .deadline(timeout, self.releases.upgrade(&ctx, &namespace, &name, &req))
                    .await?;
                Reply::json(StatusCode::OK, upgraded)
            }
            target => {
                let timeout = self.settings.request_timeout;
                self.deadline(timeout, self.dispatch(&ctx, target, &method, &params, &body))
                    .await
            }
        }
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        target: Target,
        method: &Method,
        params: &Params,
        body: &Bytes,
    ) -> Result<Reply, Error> {
        match (target, method) {
            (Target::Apply, &Method::POST) => {
                let yaml = std::str::from_utf8(body)
                    .map_err(|e| Error::BadRequest(format!("manifest is not UTF-8: {e}")))?;
                let namespace = params
                    .get("namespace")
                    .unwrap_or(&ctx.identity().default_namespace);
                let applied = Verber::for_request(ctx)
                    .apply(yaml, namespace, params.flag("upgrade")?)
                    .await?;
                Reply::json(StatusCode::OK, applied)
            }

            (Target::Releases, &Method::GET) => {
                let req = params.release_list_request(ctx.identity())?;
                Reply::json(StatusCode::OK, self.releases.list(ctx, &req).await?)
            }
            (Target::Release { namespace, name }, &Method::GET) => {
                let graph = self.releases.get(ctx, &namespace, &name).await?;
                Reply::json(StatusCode::OK, graph)
            }
            (Target::Release { namespace, name }, &Method::DELETE) => {
                let deleted = self.releases.delete(ctx, &namespace, &name).await?;
                Reply::json(StatusCode::OK, deleted)
            }
            (Target::ReleaseHistory { namespace, name }, &Method::GET) => {
                let history = self.releases.history(ctx, &namespace, &name).await?;
                Reply::json(StatusCode::OK, history)
            }
            (Target::ReleaseRollback { namespace, name }, &Method::POST) => {
                let req = json_body::<RollbackRequest>(body)?;
                let release = self.releases.rollback(ctx, &namespace, &name, &req).await?;
                Reply::json(StatusCode::OK, release)
            }

            (Target::Kind { kind, namespace }, &Method::GET) => {
                let adapter = self.registry.get(&kind)?;
                let req = params.list_request(namespace.as_deref(), ctx.identity())?;
                Ok(Reply::value(StatusCode::OK, adapter.list(ctx, &req).await?))
            }
            (Target::Kind { kind, namespace }, &Method::POST) => {
                let adapter = self.registry.get(&kind)?;
                let namespace = namespace
                    .as_deref()
                    .or_else(|| params.get("namespace"))
                    .unwrap_or(&ctx.identity().default_namespace);
                let created = adapter
                    .create(ctx, Some(namespace), json_body(body)?)
                    .await?;
                Ok(Reply::value(StatusCode::CREATED, created))
            }
            (Target::Object { kind, namespace, name }, &Method::GET) => {
                let adapter = self.registry.get(&kind)?;
                let object = adapter.get(ctx, namespace.as_deref(), &name).await?;
                Ok(Reply::value(StatusCode::OK, object))
            }
            (Target::Object { kind, namespace, name }, &Method::PUT) => {
                let adapter = self.registry.get(&kind)?;
                let updated = adapter
                    .update(ctx, namespace.as_deref(), &name, json_body(body)?)
                    .await?;
                Ok(Reply::value(StatusCode::OK, updated))
            }
            (Target::Object { kind, namespace, name }, &Method::DELETE) => {
                let adapter = self.registry.get(&kind)?;
                adapter.delete(ctx, namespace.as_deref(), &name).await?;
                Ok(Reply::empty(StatusCode::NO_CONTENT))
            }

            (target, method) => Err(Error::BadRequest(format!(
                "method {method} is not supported on {target:?}"
            ))),
        }
    }

    /// Installs and upgrades run for at least the release timeout
    fn release_timeout(&self, req: &ReleaseRequest) -> Duration {
        self.releases.timeout(req).max(self.settings.request_timeout)
    }

    async fn deadline<T>(
        &self,
        timeout: Duration,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        time::timeout(timeout, fut).await?
    }
}

// === impl ApiMetrics ===

impl Default for ApiMetrics {
    fn default() -> Self {
        Self {
            requests: Family::default(),
            durations: Family::new_with_constructor(|| {
                const BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];
                Histogram::new(BUCKETS.iter().copied())
            }),
        }
    }
}

impl ApiMetrics {
    /// Registers `kubeview_requests_total` and `kubeview_request_duration_seconds`
    pub fn register(registry: &mut prometheus_client::registry::Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "requests",
            "Number of API requests served",
            metrics.requests.clone(),
        );
        registry.register_with_unit(
            "request_duration",
            "Time to serve an API request",
            Unit::Seconds,
            metrics.durations.clone(),
        );
        metrics
    }

    fn record(&self, kind: &str, verb: &'static str, status: StatusCode, elapsed: Duration) {
        self.requests
            .get_or_create(&StatusLabels {
                kind: kind.to_string(),
                verb,
                status: status.as_u16(),
            })
            .inc();
        self.durations
            .get_or_create(&RequestLabels {
                kind: kind.to_string(),
                verb,
            })
            .observe(elapsed.as_secs_f64());
    }

    #[cfg(test)]
    fn requests(&self, kind: &str, verb: &'static str, status: u16) -> u64 {
        self.requests
            .get_or_create(&StatusLabels {
                kind: kind.to_string(),
                verb,
                status,
            })
            .get()
    }
}

// === impl Params ===

impl Params {
    fn parse(query: Option<&str>) -> Self {
        let pairs = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self(pairs)
    }

    /// Returns the last value of `key`
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// A bare key counts as set
    fn optional_flag(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some("" | "true" | "1") => Ok(Some(true)),
            Some("false" | "0") => Ok(Some(false)),
            Some(v) => Err(Error::BadRequest(format!("invalid {key}: {v:?}"))),
        }
    }

    fn flag(&self, key: &str) -> Result<bool, Error> {
        Ok(self.optional_flag(key)?.unwrap_or(false))
    }

    fn number(&self, key: &str) -> Result<usize, Error> {
        match self.get(key).filter(|v| !v.is_empty()) {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| Error::BadRequest(format!("invalid {key}: {v:?}"))),
        }
    }

    fn paginate(&self) -> Result<Paginate, Error> {
        Ok(Paginate {
            offset: self.number("offset")?,
            limit: self.number("limit")?,
        })
    }

    /// Resolves the namespaces to list, with a namespace in the path taking precedence
    fn namespaces(&self, path: Option<&str>, identity: &Identity) -> Result<NamespaceQuery, Error> {
        let params = NamespaceParams {
            namespace: path.or_else(|| self.get("namespace")).map(str::to_string),
            all_namespaces: self.flag("all_namespaces")?,
        };
        NamespaceQuery::from_request(&params, identity)
    }

    fn list_request(
        &self,
        namespace: Option<&str>,
        identity: &Identity,
    ) -> Result<ListRequest, Error> {
        let namespaces = self.namespaces(namespace, identity)?;
        let query =
            DataSelectQuery::from_params(self.all("filter"), self.all("sortBy"), self.paginate()?)?;
        Ok(ListRequest {
            namespaces,
            query,
            unused: self.optional_flag("unused")?,
            service_type: self.get("type").filter(|t| !t.is_empty()).map(str::to_string),
            involved_uid: self.get("uid").filter(|u| !u.is_empty()).map(str::to_string),
        })
    }

    /// Release lists take `filter` as a name pattern; `admin` asks for every namespace
    fn release_list_request(&self, identity: &Identity) -> Result<ReleaseListRequest, Error> {
        let params = NamespaceParams {
            namespace: self.get("namespace").map(str::to_string),
            all_namespaces: self.flag("all_namespaces")? || self.flag("admin")?,
        };
        let flags = StatusFlags {
            all: self.flag("all")?,
            deployed: self.flag("deployed")?,
            deleted: self.flag("deleted")?,
            deleting: self.flag("deleting")?,
            failed: self.flag("failed")?,
            pending: self.flag("pending")?,
            superseded: self.flag("superseded")?,
        };
        Ok(ReleaseListRequest {
            namespaces: NamespaceQuery::from_request(&params, identity)?,
            flags,
            filter: self.get("filter").filter(|f| !f.is_empty()).map(str::to_string),
            query: DataSelectQuery::from_params(
                None::<&str>,
                self.all("sortBy"),
                self.paginate()?,
            )?,
        })
    }
}

// === impl Reply ===

impl Reply {
    fn json(status: StatusCode, body: impl Serialize) -> Result<Self, Error> {
        let body = serde_json::to_value(body).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::value(status, body))
    }

    fn value(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    fn empty(status: StatusCode) -> Self {
        Self { status, body: None }
    }
}

// === helpers ===

/// Reads the caller's identity from the identity plane's headers
fn identity(headers: &HeaderMap) -> Result<Identity, Error> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let user = header(USER_HEADER)
        .ok_or_else(|| Error::Forbidden("missing caller identity".to_string()))?;
    let admin = header(ADMIN_HEADER).is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let mut namespaces = header(NAMESPACE_HEADER)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string);

    let identity = match (namespaces.next(), admin) {
        (Some(default), false) => Identity::tenant(user, default),
        (Some(default), true) => Identity {
            default_namespace: default,
            ..Identity::admin(user)
        },
        (None, true) => Identity::admin(user),
        (None, false) => {
            return Err(Error::Forbidden(format!("user {user} has no namespace")));
        }
    };
    Ok(identity.with_namespaces(namespaces))
}

async fn read_body<B>(body: B) -> Result<Bytes, Error>
where
    B: hyper::body::Body,
    B::Error: Into<BoxError>,
{
    let collected = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|error| Error::BadRequest(format!("failed to read request body: {error}")))?;
    Ok(collected.to_bytes())
}

fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("invalid request body: {e}")))
}

fn verb(method: &Method) -> &'static str {
    match *method {
        Method::GET | Method::HEAD => "get",
        Method::POST => "create",
        Method::PUT => "update",
        Method::DELETE => "delete",
        _ => "other",
    }
}

fn json_response(status: StatusCode, body: Option<Value>) -> Response<Full<Bytes>> {
    let Some(body) = body else {
        let mut rsp = Response::new(Full::default());
        *rsp.status_mut() = status;
        return rsp;
    };
    let mut rsp = Response::new(Full::new(Bytes::from(body.to_string())));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    rsp
}

fn error_response(error: &Error) -> Response<Full<Bytes>> {
    json_response(error.status(), Some(error.to_json()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{IndexerCache, Writers},
        cluster::{Cluster, ClusterMeta},
        release::{
            memory::{InMemoryCharts, InMemoryHelm},
            ChartMeta, Info, Release, ReleaseSettings, ReleaseStatus,
        },
        resource::fixtures::{meta, pod},
    };
    use hyper::Response as HttpResponse;
    use kube_client::client::Body;

    fn api(writers: &Writers, helm: Arc<InMemoryHelm>) -> (Api, ApiMetrics) {
        let cache = Arc::new(IndexerCache::from_writers("east", writers));
        let (mock, _handle) = tower_test::mock::pair::<Request<Body>, HttpResponse<Body>>();
        let client = kube_client::Client::new(mock, "default");
        let mut clusters = Clusters::default();
        clusters.insert(Cluster::new(ClusterMeta::new("east"), cache, client).with_helm(helm));

        let releases = Releases::new(
            Arc::new(InMemoryCharts::default().with_chart("stable", "web", "1.0.0")),
            ReleaseSettings {
                setup_namespaces: false,
                ..Default::default()
            },
        );
        let metrics = ApiMetrics::default();
        let api = Api::new(
            clusters,
            Registry::default(),
            releases,
            ApiSettings::default(),
            metrics.clone(),
        );
        (api, metrics)
    }

    fn get(path: &str, user: &str, namespaces: &str) -> Request<Full<Bytes>> {
        Request::get(path)
            .header(USER_HEADER, user)
            .header(NAMESPACE_HEADER, namespaces)
            .body(Full::default())
            .unwrap()
    }

    async fn json(rsp: Response<Full<Bytes>>) -> Value {
        let body = rsp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn writers() -> Writers {
        let mut writers = Writers::default();
        writers.apply(pod(meta("alice", "web-1"), "Running", true));
        writers.apply(pod(meta("alice", "web-2"), "Pending", false));
        writers.apply(pod(meta("bob", "db-1"), "Running", true));
        writers
    }

    #[tokio::test]
    async fn routes_paths() {
        let (api, _) = api(&Writers::default(), Default::default());
        let route = |path: &str| api.inner.route(path).map(|r| r.target);

        assert_eq!(
            route("/api/v1/clusters/east/pods").unwrap(),
            Target::Kind {
                kind: "pods".to_string(),
                namespace: None
            }
        );
        assert_eq!(
            route("/api/v1/clusters/east/pods/alice").unwrap(),
            Target::Kind {
                kind: "pods".to_string(),
                namespace: Some("alice".to_string())
            }
        );
        assert_eq!(
            route("/api/v1/clusters/east/nodes/node-1").unwrap(),
            Target::Object {
                kind: "nodes".to_string(),
                namespace: None,
                name: "node-1".to_string()
            }
        );
        assert_eq!(
            route("/api/v1/clusters/east/releases/alice/web/history").unwrap(),
            Target::ReleaseHistory {
                namespace: "alice".to_string(),
                name: "web".to_string()
            }
        );
        assert_eq!(route("/api/v1/clusters/east/_apply").unwrap(), Target::Apply);
        assert_eq!(route("/healthz").unwrap_err().kind(), "not-found");
        assert_eq!(route("/api/v1/clusters/").unwrap_err().kind(), "not-found");
    }

    #[test]
    fn reads_identity_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.insert(NAMESPACE_HEADER, HeaderValue::from_static("alice, shared"));
        let id = identity(&headers).unwrap();
        assert_eq!(id.default_namespace, "alice");
        assert!(id.owns("shared"));
        assert!(!id.admin);

        headers.remove(NAMESPACE_HEADER);
        assert_eq!(identity(&headers).unwrap_err().kind(), "forbidden");

        headers.insert(ADMIN_HEADER, HeaderValue::from_static("true"));
        assert!(identity(&headers).unwrap().admin);

        assert_eq!(identity(&HeaderMap::new()).unwrap_err().kind(), "forbidden");
    }

    #[tokio::test]
    async fn lists_tenant_pods() {
        let (api, metrics) = api(&writers(), Default::default());
        let rsp = api
            .handle(get("/api/v1/clusters/east/pods?sortBy=%2Bname&limit=1", "alice", "alice"))
            .await;
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = json(rsp).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["objectMeta"]["name"], "web-1");
        assert_eq!(metrics.requests("pods", "get", 200), 1);
    }

    #[tokio::test]
    async fn rejects_all_namespaces_for_tenants() {
        let (api, metrics) = api(&writers(), Default::default());
        let rsp = api
            .handle(get("/api/v1/clusters/east/pods?all_namespaces=true", "alice", "alice"))
            .await;
        assert_eq!(rsp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json(rsp).await["kind"], "forbidden");
        assert_eq!(metrics.requests("pods", "get", 403), 1);
    }

    #[tokio::test]
    async fn unknown_cluster_is_not_found() {
        let (api, _) = api(&writers(), Default::default());
        let rsp = api.handle(get("/api/v1/clusters/west/pods", "alice", "alice")).await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_releases() {
        let release = |version, status| Release {
            name: "web".to_string(),
            namespace: "alice".to_string(),
            version,
            chart: ChartMeta {
                name: "web".to_string(),
                version: "1.0.0".to_string(),
            },
            info: Some(Info {
                status,
                ..Default::default()
            }),
            ..Default::default()
        };
        let helm = Arc::new(
            InMemoryHelm::default()
                .with_release(release(1, ReleaseStatus::Superseded))
                .with_release(release(2, ReleaseStatus::Deployed)),
        );
        let (api, _) = api(&Writers::default(), helm);

        let rsp = api
            .handle(get("/api/v1/clusters/east/releases?namespace=alice", "alice", "alice"))
            .await;
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = json(rsp).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["version"], 2);

        let rsp = api
            .handle(get("/api/v1/clusters/east/releases/alice/web/history", "alice", "alice"))
            .await;
        let body = json(rsp).await;
        assert_eq!(body[0]["revision"], 2);
        assert_eq!(body[1]["revision"], 1);
    }

    #[tokio::test]
    async fn installs_releases() {
        let helm = Arc::new(InMemoryHelm::default());
        let (api, _) = api(&Writers::default(), helm.clone());
        let req = Request::post("/api/v1/clusters/east/releases")
            .header(USER_HEADER, "alice")
            .header(NAMESPACE_HEADER, "alice")
            .body(Full::new(Bytes::from_static(
                br#"{"chart": "stable/web", "name": "web", "sets": ["replicas=2"]}"#,
            )))
            .unwrap();
        let rsp = api.handle(req).await;
        assert_eq!(rsp.status(), StatusCode::CREATED);
        assert_eq!(json(rsp).await["namespace"], "alice");

        let installs = helm.installs();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].values["replicas"], 2);
        assert_eq!(installs[0].timeout, Duration::from_secs(1500));
    }

    #[tokio::test]
    async fn zero_release_timeouts_use_the_default() {
        let helm = Arc::new(InMemoryHelm::default());
        let (api, _) = api(&Writers::default(), helm.clone());
        let req = Request::post("/api/v1/clusters/east/releases")
            .header(USER_HEADER, "alice")
            .header(NAMESPACE_HEADER, "alice")
            .body(Full::new(Bytes::from_static(
                br#"{"chart": "stable/web", "name": "web", "timeout": 0}"#,
            )))
            .unwrap();
        let rsp = api.handle(req).await;
        assert_eq!(rsp.status(), StatusCode::CREATED);
        assert_eq!(helm.installs()[0].timeout, Duration::from_secs(1500));

        let deadline = |timeout| {
            api.inner.release_timeout(&ReleaseRequest {
                timeout,
                ..Default::default()
            })
        };
        assert_eq!(deadline(Some(0)), Duration::from_secs(1500));
        assert_eq!(deadline(None), Duration::from_secs(1500));
        assert_eq!(deadline(Some(60)), Duration::from_secs(60));
        assert_eq!(deadline(Some(5)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn rejects_malformed_queries() {
        let (api, _) = api(&writers(), Default::default());
        let rsp = api
            .handle(get("/api/v1/clusters/east/pods?limit=many", "alice", "alice"))
            .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(rsp).await["kind"], "bad-request");
    }
}

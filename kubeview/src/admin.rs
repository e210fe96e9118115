//! Admin server: liveness, readiness and metrics endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus_client::registry::Registry;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, info_span, Instrument};

/// Command-line arguments used to configure an admin server
#[derive(Clone, Debug, clap::Args)]
pub struct AdminArgs {
    /// The admin server's address
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub admin_addr: SocketAddr,
}

/// Supports configuring an admin server
#[derive(Debug)]
pub struct Builder {
    addr: SocketAddr,
    ready: Readiness,
}

/// An admin server bound to its socket but not yet serving
#[derive(Debug)]
pub struct Bound {
    addr: SocketAddr,
    ready: Readiness,
    listener: std::net::TcpListener,
}

/// A shared readiness flag
///
/// Used both for the admin server's `/ready` endpoint and for per-cluster cache sync state.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

/// A handle to a running admin server
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    ready: Readiness,
    task: tokio::task::JoinHandle<()>,
}

type Body = Full<Bytes>;

// === impl AdminArgs ===

impl Default for AdminArgs {
    fn default() -> Self {
        Self {
            admin_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl AdminArgs {
    pub fn into_builder(self) -> Builder {
        Builder::new(self.admin_addr)
    }
}

impl From<AdminArgs> for Builder {
    fn from(args: AdminArgs) -> Self {
        args.into_builder()
    }
}

// === impl Builder ===

impl Default for Builder {
    fn default() -> Self {
        AdminArgs::default().into_builder()
    }
}

impl Builder {
    /// The server starts unready; the runtime marks it ready once caches sync
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ready: Readiness::default(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.clone()
    }

    /// Binds the admin server without accepting connections
    pub fn bind(self) -> std::io::Result<Bound> {
        let listener = std::net::TcpListener::bind(self.addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        Ok(Bound {
            addr,
            ready: self.ready,
            listener,
        })
    }
}

// === impl Bound ===

impl Bound {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.clone()
    }

    /// Runs the server on a background task, exposing `registry` on `/metrics`
    pub fn spawn(self, registry: Registry) -> Server {
        let Self {
            addr,
            ready,
            listener,
        } = self;
        let registry = Arc::new(registry);

        let task = {
            let ready = ready.clone();
            tokio::spawn(
                async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(l) => l,
                        Err(error) => {
                            info!(%error, "failed to register admin listener");
                            return;
                        }
                    };
                    debug!("serving");
                    loop {
                        let (socket, _) = match listener.accept().await {
                            Ok(conn) => conn,
                            Err(error) => {
                                info!(%error, "failed to accept connection");
                                continue;
                            }
                        };
                        let ready = ready.clone();
                        let registry = registry.clone();
                        let svc = hyper::service::service_fn(move |req| {
                            let rsp = route(&ready, &registry, req);
                            async move { Ok::<_, Infallible>(rsp) }
                        });
                        tokio::spawn(
                            async move {
                                let res = hyper::server::conn::http1::Builder::new()
                                    // Allow weird clients (like netcat).
                                    .half_close(true)
                                    // Prevent port scanners, etc, from holding connections open.
                                    .header_read_timeout(Duration::from_secs(2))
                                    .timer(hyper_util::rt::TokioTimer::new())
                                    .max_buf_size(8 * 1024)
                                    .serve_connection(TokioIo::new(socket), svc)
                                    .await;
                                if let Err(error) = res {
                                    debug!(%error, "admin connection failed");
                                }
                            }
                            .in_current_span(),
                        );
                    }
                }
                .instrument(info_span!("admin", port = %addr.port())),
            )
        };

        Server { addr, ready, task }
    }
}

// === impl Readiness ===

impl Readiness {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

// === impl Server ===

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.clone()
    }

    pub fn into_join_handle(self) -> tokio::task::JoinHandle<()> {
        self.task
    }
}

// === handlers ===

fn route(ready: &Readiness, registry: &Registry, req: Request<Incoming>) -> Response<Body> {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        let mut rsp = text(StatusCode::METHOD_NOT_ALLOWED, "");
        rsp.headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return rsp;
    }

    match req.uri().path() {
        "/live" => text(StatusCode::OK, "alive\n"),
        "/ready" if ready.get() => text(StatusCode::OK, "ready\n"),
        "/ready" => text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n"),
        "/metrics" => metrics(registry),
        _ => text(StatusCode::NOT_FOUND, ""),
    }
}

fn metrics(registry: &Registry) -> Response<Body> {
    let mut buf = String::new();
    if let Err(error) = prometheus_client::encoding::text::encode(&mut buf, registry) {
        info!(%error, "failed to encode metrics");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "");
    }
    let mut rsp = Response::new(Full::new(Bytes::from(buf)));
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/openmetrics-text; version=1.0.0; charset=utf-8"),
    );
    rsp
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut rsp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *rsp.status_mut() = status;
    rsp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_is_shared() {
        let ready = Readiness::default();
        let clone = ready.clone();
        assert!(!clone.get());
        ready.set(true);
        assert!(clone.get());
    }
}

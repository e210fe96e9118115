//! The API server
//!
//! Serves HTTP/1 and HTTP/2 on `--server-addr`. When both `--server-tls-key` and
//! `--server-tls-certs` are set, connections are served over TLS and the credentials are reloaded
//! for each connection to support certificate rotation. Without them the server speaks plaintext,
//! as it does behind a TLS-terminating identity proxy.
//!
//! TLS requires the `rustls-tls` feature; configuring credentials without it fails at bind time.

#![cfg_attr(not(feature = "rustls-tls"), allow(dead_code, unused_variables))]

use std::{convert::Infallible, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tower::Service;
use tracing::{debug, error, info, info_span, Instrument};

#[cfg(feature = "rustls-tls")]
mod tls_rustls;

/// Command-line arguments used to configure the API server
#[derive(Clone, Debug, clap::Args)]
pub struct ServerArgs {
    /// The server's address
    #[clap(long, default_value = "0.0.0.0:8443")]
    pub server_addr: SocketAddr,

    /// The path to the server's TLS key file.
    ///
    /// This should be a PEM-encoded file containing a single PKCS#8 or RSA
    /// private key.
    #[clap(long, requires = "server_tls_certs")]
    pub server_tls_key: Option<TlsKeyPath>,

    /// The path to the server's TLS certificate file.
    ///
    /// This should be a PEM-encoded file containing at least one TLS end-entity
    /// certificate.
    #[clap(long, requires = "server_tls_key")]
    pub server_tls_certs: Option<TlsCertPath>,
}

/// A server bound to its socket but not yet serving
#[derive(Debug)]
pub struct Bound {
    local_addr: SocketAddr,
    tcp: TcpListener,
    tls: Option<Arc<TlsPaths>>,
}

/// A running server
#[derive(Debug)]
pub struct SpawnedServer {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

/// Describes an error that occurred while initializing a server
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Only one of the TLS key and certificate paths was configured
    #[error("--server-tls-key and --server-tls-certs must be set together")]
    PartialTls,

    /// TLS credentials were configured but no TLS implementation is enabled
    #[error("TLS credentials were configured but TLS support is not enabled")]
    TlsNotEnabled,

    /// The configured TLS certificate path could not be read
    #[error("failed to read TLS certificates: {0}")]
    TlsCertsReadError(#[source] std::io::Error),

    /// The configured TLS key path could not be read
    #[error("failed to read TLS key: {0}")]
    TlsKeyReadError(#[source] std::io::Error),

    /// The configured TLS credentials were invalid
    #[error("failed to load TLS credentials: {0}")]
    InvalidTlsCredentials(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An error occurred while binding a server
    #[error("failed to bind {0:?}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    /// An error occurred while reading a bound server's local address
    #[error("failed to get bound local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// The path to the server's TLS private key
#[derive(Clone, Debug)]
pub struct TlsKeyPath(PathBuf);

/// The path to the server's TLS certificate bundle
#[derive(Clone, Debug)]
pub struct TlsCertPath(PathBuf);

#[derive(Clone, Debug)]
struct TlsPaths {
    key: TlsKeyPath,
    certs: TlsCertPath,
}

// === impl ServerArgs ===

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            server_tls_key: None,
            server_tls_certs: None,
        }
    }
}

impl ServerArgs {
    /// Loads credentials, if configured, and binds the server socket
    pub async fn bind(self) -> Result<Bound, Error> {
        let tls = match (self.server_tls_key, self.server_tls_certs) {
            (None, None) => None,
            (Some(key), Some(certs)) => Some(Arc::new(TlsPaths::load(key, certs).await?)),
            _ => return Err(Error::PartialTls),
        };

        let tcp = TcpListener::bind(&self.server_addr)
            .await
            .map_err(|e| Error::Bind(self.server_addr, e))?;
        let local_addr = tcp.local_addr().map_err(Error::LocalAddr)?;
        Ok(Bound {
            local_addr,
            tcp,
            tls,
        })
    }
}

// === impl Bound ===

impl Bound {
    /// Returns the bound local address of the server
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns true if connections are served over TLS
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Serves `service` on a background task
    ///
    /// The server stops accepting connections when `drain` is signaled and then waits for
    /// in-flight requests to complete.
    pub fn spawn<S, B>(self, service: S, drain: drain::Watch) -> SpawnedServer
    where
        S: Service<hyper::Request<hyper::body::Incoming>, Response = hyper::Response<B>>
            + Clone
            + Send
            + 'static,
        S::Error: std::error::Error + Send + Sync,
        S::Future: Send,
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::error::Error + Send + Sync,
    {
        let Self {
            local_addr,
            tcp,
            tls,
        } = self;

        let task = tokio::spawn(
            accept_loop(tcp, drain, service, tls)
                .instrument(info_span!("server", port = %local_addr.port())),
        );

        SpawnedServer { local_addr, task }
    }
}

// === impl SpawnedServer ===

impl SpawnedServer {
    /// Returns the bound local address of the spawned server
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Terminates the server task forcefully
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the server task to complete
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

async fn accept_loop<S, B>(
    tcp: TcpListener,
    drain: drain::Watch,
    service: S,
    tls: Option<Arc<TlsPaths>>,
) where
    S: Service<hyper::Request<hyper::body::Incoming>, Response = hyper::Response<B>>
        + Clone
        + Send
        + 'static,
    S::Error: std::error::Error + Send + Sync,
    S::Future: Send,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync,
{
    debug!(tls = tls.is_some(), "listening");
    loop {
        let socket = tokio::select! {
            biased;

            release = drain.clone().signaled() => {
                drop(release);
                return;
            }

            res = tcp.accept() => match res {
                Ok((socket, _)) => socket,
                Err(error) => {
                    error!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        if let Err(error) = socket.set_nodelay(true) {
            error!(%error, "Failed to set TCP_NODELAY");
            continue;
        }

        let client_addr = match socket.peer_addr() {
            Ok(addr) => addr,
            Err(error) => {
                error!(%error, "Failed to get peer address");
                continue;
            }
        };

        let span = info_span!(
            "conn",
            client.ip = %client_addr.ip(),
            client.port = %client_addr.port(),
        );
        let drain = drain.clone();
        let service = service.clone();
        match tls.clone() {
            None => {
                tokio::spawn(serve_conn(socket, drain, service).instrument(span));
            }
            Some(tls) => {
                tokio::spawn(serve_tls_conn(socket, drain, service, tls).instrument(span));
            }
        }
    }
}

#[cfg(feature = "rustls-tls")]
async fn serve_tls_conn<S, B>(
    socket: TcpStream,
    drain: drain::Watch,
    service: S,
    tls: Arc<TlsPaths>,
) where
    S: Service<hyper::Request<hyper::body::Incoming>, Response = hyper::Response<B>>
        + Clone
        + Send
        + 'static,
    S::Error: std::error::Error + Send + Sync,
    S::Future: Send,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync,
{
    // Reload the TLS credentials for each connection.
    let TlsPaths { key, certs } = &*tls;
    let acceptor = match tls_rustls::load_tls(key, certs).await {
        Ok(acceptor) => acceptor,
        Err(error) => {
            info!(%error, "Connection failed");
            return;
        }
    };
    tracing::trace!("loaded TLS credentials");

    let socket = match tls_rustls::accept(&acceptor, socket).await {
        Ok(socket) => socket,
        Err(error) => {
            info!(%error, "TLS handshake failed");
            return;
        }
    };
    tracing::trace!("TLS handshake completed");

    serve_conn(socket, drain, service).await
}

#[cfg(not(feature = "rustls-tls"))]
async fn serve_tls_conn<S>(_: TcpStream, _: drain::Watch, _: S, _: Arc<TlsPaths>) {
    info!("TLS support not enabled");
}

async fn serve_conn<I, S, B>(io: I, drain: drain::Watch, service: S)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Service<hyper::Request<hyper::body::Incoming>, Response = hyper::Response<B>>
        + Clone
        + Send
        + 'static,
    S::Error: std::error::Error + Send + Sync,
    S::Future: Send,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync,
{
    debug!("accepted connection");

    #[derive(Copy, Clone, Debug)]
    struct Executor;
    impl<F> hyper::rt::Executor<F> for Executor
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        fn execute(&self, fut: F) {
            tokio::spawn(fut.in_current_span());
        }
    }

    // Serve the connection until a drain is signaled, then let in-flight requests complete.
    let mut builder = hyper_util::server::conn::auto::Builder::new(Executor);
    // Prevent port scanners, etc, from holding connections open.
    builder
        .http1()
        .header_read_timeout(std::time::Duration::from_secs(2))
        .timer(hyper_util::rt::TokioTimer::default());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let conn = graceful.watch(
        builder
            .serve_connection(
                hyper_util::rt::TokioIo::new(io),
                hyper_util::service::TowerToHyperService::new(service),
            )
            .into_owned(),
    );
    tokio::spawn(
        async move {
            match conn.await {
                Ok(()) => debug!("Connection closed"),
                Err(error) => info!(%error, "Connection lost"),
            }
        }
        .in_current_span(),
    );

    let latch = drain.signaled().await;
    latch.release_after(graceful.shutdown()).await;
}

// === impl TlsPaths ===

impl TlsPaths {
    /// Ensures the credentials load before the socket is bound
    #[cfg(feature = "rustls-tls")]
    async fn load(key: TlsKeyPath, certs: TlsCertPath) -> Result<Self, Error> {
        tls_rustls::load_tls(&key, &certs).await?;
        Ok(Self { key, certs })
    }

    #[cfg(not(feature = "rustls-tls"))]
    async fn load(_: TlsKeyPath, _: TlsCertPath) -> Result<Self, Error> {
        Err(Error::TlsNotEnabled)
    }
}

// === impl TlsCertPath ===

impl FromStr for TlsCertPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// === impl TlsKeyPath ===

impl FromStr for TlsKeyPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_plaintext_without_credentials() {
        let args = ServerArgs {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let bound = args.bind().await.expect("must bind");
        assert!(!bound.is_tls());
        assert_ne!(bound.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn rejects_partial_credentials() {
        let args = ServerArgs {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            server_tls_key: Some("key.pem".parse().unwrap()),
            ..Default::default()
        };
        assert!(matches!(args.bind().await, Err(Error::PartialTls)));
    }
}

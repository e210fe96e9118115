//! Signal handling and graceful shutdown

use futures_core::{Future, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

pub use drain::Watch;

/// Drives shutdown by watching signals
#[derive(Debug)]
#[must_use = "call `Shutdown::signaled` to await a signal"]
pub struct Shutdown {
    signals: Signals,
    tx: drain::Signal,
}

/// Indicates that shutdown did not complete gracefully because a second signal was received
#[derive(Copy, Clone, Debug, thiserror::Error)]
#[error("process aborted by signal")]
pub struct Aborted(());

/// Indicates an error registering a signal handler
#[derive(Debug, thiserror::Error)]
#[error("failed to register signal handler: {0}")]
pub struct RegisterError(#[from] std::io::Error);

type Signaled = Pin<Box<dyn Future<Output = drain::ReleaseShutdown> + Send + 'static>>;

#[derive(Debug)]
struct Signals {
    interrupt: Signal,
    terminate: Signal,
}

pin_project_lite::pin_project! {
    /// Wraps a `Future` or `Stream` so that it completes when shutdown is signaled
    pub struct CancelOnShutdown<T> {
        #[pin]
        inner: T,
        signaled: Option<Signaled>,
    }
}

/// Creates a shutdown channel driven by SIGINT and SIGTERM
///
/// When the first signal is received, [`Watch`] instances are notified and, once all watches are
/// dropped, shutdown completes. A second signal received while draining aborts the process.
pub fn sigint_or_sigterm() -> Result<(Shutdown, Watch), RegisterError> {
    let signals = Signals {
        interrupt: signal(SignalKind::interrupt())?,
        terminate: signal(SignalKind::terminate())?,
    };
    let (tx, rx) = drain::channel();
    Ok((Shutdown { signals, tx }, rx))
}

// === impl Shutdown ===

impl Shutdown {
    /// Watches for signals and drives shutdown
    ///
    /// If a second signal is received while waiting for watches to be released, this future
    /// completes immediately with [`Aborted`].
    pub async fn signaled(self) -> Result<(), Aborted> {
        let Self { mut signals, tx } = self;

        signals.recv().await;
        debug!("draining");

        tokio::select! {
            _ = tx.drain() => {
                debug!("drained");
                Ok(())
            },

            _ = signals.recv() => {
                debug!("aborting");
                Err(Aborted(()))
            },
        }
    }
}

impl Signals {
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => debug!("received SIGINT"),
            _ = self.terminate.recv() => debug!("received SIGTERM"),
        }
    }
}

// === impl CancelOnShutdown ===

impl<T> CancelOnShutdown<T> {
    /// Wraps `inner` so that it completes when `watch` is signaled
    pub fn new(watch: Watch, inner: T) -> Self {
        let signaled = Box::pin(async move { watch.signaled().await });
        Self {
            inner,
            signaled: Some(signaled),
        }
    }
}

/// Polls the shutdown signal, returning true once shutdown has been signaled
fn poll_signaled(signaled: &mut Option<Signaled>, cx: &mut Context<'_>) -> bool {
    let Some(fut) = signaled.as_mut() else {
        return true;
    };
    match fut.as_mut().poll(cx) {
        Poll::Ready(release) => {
            drop(release);
            *signaled = None;
            true
        }
        Poll::Pending => false,
    }
}

impl<F: Future<Output = ()>> Future for CancelOnShutdown<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        if poll_signaled(this.signaled, cx) {
            return Poll::Ready(());
        }
        this.inner.poll(cx)
    }
}

impl<S: Stream> Stream for CancelOnShutdown<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        let this = self.project();
        if poll_signaled(this.signaled, cx) {
            return Poll::Ready(None);
        }
        this.inner.poll_next(cx)
    }
}

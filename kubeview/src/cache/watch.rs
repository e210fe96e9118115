//! Watch stream plumbing: error recovery and event metrics

use futures_core::{Future, Stream, TryStream};
use futures_util::{ready, StreamExt};
use kube_runtime::watcher;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::time;
use tracing::info;

pin_project_lite::pin_project! {
    /// Wraps a watch, logging its errors and sleeping before retrying after consecutive failures
    ///
    /// The first error is retried immediately. If the retry fails too, a fixed delay is applied
    /// before each subsequent poll until the stream yields an item again.
    #[derive(Debug)]
    pub struct LogAndSleep<S> {
        kind: &'static str,
        delay: time::Duration,
        failed: bool,

        #[pin]
        sleep: time::Sleep,
        sleeping: bool,

        #[pin]
        stream: S,
    }
}

/// Counts watch events per kind
#[derive(Clone, Debug, Default)]
pub struct WatchMetrics {
    events: Family<EventLabels, Counter>,
    errors: Family<ErrorLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: &'static str,
    op: EventOp,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum EventOp {
    Apply,
    Delete,
    Init,
    InitApply,
    InitDone,
}

// === impl LogAndSleep ===

impl<S> LogAndSleep<S> {
    pub fn fixed_delay(kind: &'static str, delay: time::Duration, stream: S) -> Self {
        Self {
            kind,
            delay,
            failed: false,
            sleep: time::sleep(time::Duration::ZERO),
            sleeping: false,
            stream,
        }
    }
}

impl<S> Stream for LogAndSleep<S>
where
    S: TryStream,
    S::Error: std::fmt::Display,
{
    type Item = S::Ok;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.sleeping {
                ready!(this.sleep.as_mut().poll(cx));
                *this.sleeping = false;
            }

            match ready!(this.stream.as_mut().try_poll_next(cx)) {
                None => {
                    *this.failed = false;
                    return Poll::Ready(None);
                }

                Some(Ok(item)) => {
                    *this.failed = false;
                    return Poll::Ready(Some(item));
                }

                Some(Err(error)) => {
                    info!(kind = *this.kind, %error, "watch failed");
                    if *this.failed {
                        *this.sleeping = true;
                        this.sleep
                            .as_mut()
                            .reset(time::Instant::now() + *this.delay);
                    }
                    *this.failed = true;
                }
            };
        }
    }
}

// === impl WatchMetrics ===

impl WatchMetrics {
    /// Creates watch metrics registered as `kubeview_watch_events_total` and
    /// `kubeview_watch_errors_total`
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "watch_events",
            "Count of events observed by resource watches",
            metrics.events.clone(),
        );
        registry.register(
            "watch_errors",
            "Count of errors observed by resource watches",
            metrics.errors.clone(),
        );
        metrics
    }

    /// Counts each event or error that passes through `watch`
    pub fn instrument<K, S>(
        self,
        kind: &'static str,
        watch: S,
    ) -> impl Stream<Item = watcher::Result<watcher::Event<K>>> + Send
    where
        S: Stream<Item = watcher::Result<watcher::Event<K>>> + Send,
    {
        watch.map(move |event| {
            match &event {
                Ok(ev) => {
                    let op = match ev {
                        watcher::Event::Apply(_) => EventOp::Apply,
                        watcher::Event::Delete(_) => EventOp::Delete,
                        watcher::Event::Init => EventOp::Init,
                        watcher::Event::InitApply(_) => EventOp::InitApply,
                        watcher::Event::InitDone => EventOp::InitDone,
                    };
                    self.events.get_or_create(&EventLabels { kind, op }).inc();
                }
                Err(_) => {
                    self.errors.get_or_create(&ErrorLabels { kind }).inc();
                }
            }
            event
        })
    }

    #[cfg(test)]
    fn applied(&self, kind: &'static str) -> u64 {
        self.events
            .get_or_create(&EventLabels {
                kind,
                op: EventOp::Apply,
            })
            .get()
    }
}

//! Tracks when informer caches have completed their initial sync

use futures_core::{Future, Stream};
use futures_util::ready;
use kube_runtime::watcher;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Grants handles to components that must sync and then waits for every handle to be dropped
#[derive(Debug)]
pub struct Initialized {
    semaphore: Arc<Semaphore>,
    issued: u32,
}

/// Signals a component has been initialized
#[derive(Debug)]
#[must_use]
pub struct Handle(OwnedSemaphorePermit);

pin_project_lite::pin_project! {
    /// Wraps a watch stream, releasing a [`Handle`] once the watcher reports its initial list is
    /// complete
    #[derive(Debug)]
    pub struct ReleasesOnSynced<S> {
        #[pin]
        inner: S,
        handle: Option<Handle>,
    }
}

// === impl Initialized ===

impl Default for Initialized {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
            issued: 0,
        }
    }
}

impl Initialized {
    /// Creates a new [`Handle`] to be dropped when a component has been initialized
    pub fn add_handle(&mut self) -> Handle {
        let sem = self.semaphore.clone();
        sem.add_permits(1);
        let permit = sem
            .try_acquire_owned()
            .expect("semaphore must issue permit");
        self.issued += 1;
        Handle(permit)
    }

    /// Returns the number of handles issued so far
    pub fn issued(&self) -> u32 {
        self.issued
    }

    /// Waits for all handles to be dropped
    pub async fn initialized(self) {
        let _permit = self
            .semaphore
            .acquire_many(self.issued)
            .await
            .expect("semaphore cannot be closed");
    }
}

// === impl Handle ===

impl Handle {
    /// Wraps a watch stream so that this handle is released on the watcher's `InitDone` event
    pub fn release_on_synced<S>(self, inner: S) -> ReleasesOnSynced<S> {
        ReleasesOnSynced::new(inner, self)
    }
}

// === impl ReleasesOnSynced ===

impl<S> ReleasesOnSynced<S> {
    /// Wraps `S` so that the [`Handle`] is dropped when `S` yields `InitDone`
    pub fn new(inner: S, handle: Handle) -> Self {
        Self {
            inner,
            handle: Some(handle),
        }
    }
}

impl<S, K> Stream for ReleasesOnSynced<S>
where
    S: Stream<Item = watcher::Event<K>>,
{
    type Item = watcher::Event<K>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let next = ready!(this.inner.poll_next(cx));
        // A watch that terminates never syncs; release anyway so shutdown is not held up.
        if matches!(next, None | Some(watcher::Event::InitDone)) {
            drop(this.handle.take());
        }
        Poll::Ready(next)
    }
}

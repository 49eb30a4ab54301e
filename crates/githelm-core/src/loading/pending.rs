// ── Pending request counter ──
//
// The simple "something is in flight" indicator. The counter never goes
// below zero, so unmatched `end_request` calls are harmless.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

#[derive(Clone)]
pub struct PendingRequests {
    inner: Arc<PendingInner>,
}

struct PendingInner {
    count: AtomicUsize,
    loading: watch::Sender<bool>,
}

impl PendingRequests {
    pub fn new() -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            inner: Arc::new(PendingInner {
                count: AtomicUsize::new(0),
                loading,
            }),
        }
    }

    pub fn start_request(&self) {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        self.publish();
    }

    /// Decrement, saturating at zero.
    pub fn end_request(&self) {
        let _ = self
            .inner
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        self.publish();
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.count() > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    /// Start a request that ends when the guard is dropped.
    pub fn guard(&self) -> RequestGuard {
        self.start_request();
        RequestGuard {
            pending: self.clone(),
        }
    }

    /// Keep the counter elevated for the lifetime of `fut`. The request
    /// ends on completion, on error, and if the future is dropped early.
    pub async fn track<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.guard();
        fut.await
    }

    fn publish(&self) {
        let loading = self.is_loading();
        self.inner.loading.send_if_modified(|current| {
            let changed = *current != loading;
            *current = loading;
            changed
        });
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("count", &self.count())
            .finish()
    }
}

/// RAII handle from [`PendingRequests::guard`].
#[must_use = "the request ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RequestGuard {
    pending: PendingRequests,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.pending.end_request();
    }
}

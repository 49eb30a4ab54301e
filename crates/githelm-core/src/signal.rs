// ── Observable values ──
//
// A single current value with two ways to follow it:
// - synchronous callbacks that see every published value, in order,
//   starting with a replay of the current value at subscribe time;
// - a `watch` receiver / stream for async consumers that only care
//   about the latest value.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

// ── Subscription ─────────────────────────────────────────────────

/// Handle returned by every `subscribe` in this crate.
///
/// Runs its disposer exactly once, on [`unsubscribe`](Self::unsubscribe)
/// or on drop, whichever comes first.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self { dispose: None }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

// ── Observable ───────────────────────────────────────────────────

/// Cheaply cloneable observable value. Clones share state.
pub struct Observable<T: Clone + Send + Sync + 'static> {
    inner: Arc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    value: watch::Sender<T>,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            inner: Arc::new(ObservableInner {
                value,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        // `send_replace` stores the value even with zero receivers.
        self.inner.value.send_replace(value.clone());
        self.notify(&value);
    }

    /// Derive the next value from the current one and publish it.
    ///
    /// The read and the write happen under one lock, so concurrent updates
    /// never overwrite each other. `f` must not touch this observable.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let mut published = None;
        self.inner.value.send_modify(|current| {
            let next = f(current);
            *current = next.clone();
            published = Some(next);
        });
        if let Some(value) = published {
            self.notify(&value);
        }
    }

    /// Register a callback. It is invoked immediately with the current
    /// value, then once per subsequent `set`.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);
        self.lock_callbacks().push((id, Arc::clone(&callback)));

        let current = self.get();
        callback(&current);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(cb_id, _)| *cb_id != id);
            }
        })
    }

    /// Receiver for async consumers.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.inner.value.subscribe()
    }

    /// Stream of values, starting with the current one.
    pub fn stream(&self) -> ObservableStream<T> {
        ObservableStream {
            inner: WatchStream::new(self.watch()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_callbacks().len()
    }

    fn notify(&self, value: &T) {
        // Snapshot so callbacks may subscribe, unsubscribe, or publish
        // on other observables without holding our lock.
        let callbacks: Vec<Callback<T>> = self
            .lock_callbacks()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + Sync + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// `Stream` adapter over an [`Observable`].
pub struct ObservableStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<T>,
}

impl<T: Clone + Send + Sync + 'static> Stream for ObservableStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn subscribe_replays_current_value() {
        let obs = Observable::new(7);
        let (seen, cb) = recorder();
        let _sub = obs.subscribe(cb);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn every_subscriber_sees_every_value_in_order() {
        let obs = Observable::new(String::new());
        let (a, cb_a) = recorder();
        let (b, cb_b) = recorder();
        let _sa = obs.subscribe(cb_a);
        let _sb = obs.subscribe(cb_b);

        obs.set("one".into());
        obs.set("two".into());

        let expected = vec![String::new(), "one".into(), "two".into()];
        assert_eq!(*a.lock().unwrap(), expected);
        assert_eq!(*b.lock().unwrap(), expected);
    }

    #[test]
    fn late_subscriber_only_gets_current_value() {
        let obs = Observable::new(0);
        obs.set(1);
        obs.set(2);
        let (seen, cb) = recorder();
        let _sub = obs.subscribe(cb);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let obs = Observable::new(0);
        let (seen, cb) = recorder();
        let sub = obs.subscribe(cb);
        assert_eq!(obs.subscriber_count(), 1);

        drop(sub);
        obs.set(5);
        assert_eq!(obs.subscriber_count(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn disposer_runs_exactly_once() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_derives_from_current() {
        let obs = Observable::new(10);
        obs.update(|v| v + 5);
        assert_eq!(obs.get(), 15);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let obs = Observable::new(0u64);
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let _sub = obs.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let obs = obs.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        obs.update(|v| v + 1);
                    }
                });
            }
        });

        assert_eq!(obs.get(), 4_000);
        // One replay at subscribe time plus one per update.
        assert_eq!(seen.load(Ordering::SeqCst), 4_001);
    }

    #[tokio::test]
    async fn stream_yields_latest_values() {
        let obs = Observable::new(1);
        let mut stream = obs.stream();
        assert_eq!(stream.next().await, Some(1));
        obs.set(2);
        assert_eq!(stream.next().await, Some(2));
    }
}

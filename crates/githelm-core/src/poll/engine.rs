// ── Polling engine ──
//
// One `PolledValue` per key. The first subscriber seeds it from the
// durable store and starts its background task; the last one to leave
// cancels the task. Fetches for one key are serialized by a per-value
// lock, fetches for different keys are fully independent.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::task;
use super::trigger::ManualTrigger;
use crate::clock::duration_millis;
use crate::config::FreshnessConfig;
use crate::error::FetchError;
use crate::loading::LoadingTracker;
use crate::signal::{Observable, ObservableStream, Subscription};
use crate::storage::{DurableStore, StorageEnvelope};

/// Anything a fetch function can return and the store can persist.
pub trait PollData: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PollData for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

pub type FetchFuture<T> = BoxFuture<'static, Result<T, FetchError>>;
type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Where a polled value is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PollPhase {
    #[default]
    Uninitialized,
    /// Showing last-known-good data from the store.
    Seeded,
    Fresh,
    Fetching,
    RetryScheduled { attempt: u32, delay: Duration },
    /// Torn down. A later subscriber starts it again.
    Stopped,
}

/// Result of one staleness decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Data was stale or missing and a fetch succeeded.
    Fetched,
    /// Stored data was fresh and has been republished.
    Reused,
}

// ── PollingEngine ────────────────────────────────────────────────

/// Factory for polled values sharing one store, trigger, and config.
#[derive(Clone)]
pub struct PollingEngine {
    store: DurableStore,
    trigger: ManualTrigger,
    config: FreshnessConfig,
    loading: Option<LoadingTracker>,
    active: Arc<AtomicUsize>,
}

impl PollingEngine {
    pub fn new(store: DurableStore, trigger: ManualTrigger, config: FreshnessConfig) -> Self {
        Self {
            store,
            trigger,
            config,
            loading: None,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report every fetch to `tracker` as task `poll:{key}`.
    pub fn with_loading(mut self, tracker: LoadingTracker) -> Self {
        self.loading = Some(tracker);
        self
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    pub fn trigger(&self) -> &ManualTrigger {
        &self.trigger
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// Number of background tasks currently running.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// A polled value for `key`, refreshed through `fetch`. Nothing runs
    /// until the value gets its first subscriber.
    pub fn poll<T, F, Fut>(&self, key: impl Into<String>, fetch: F) -> PolledValue<T>
    where
        T: PollData,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let key = key.into();
        let (phase, _) = watch::channel(PollPhase::Uninitialized);
        PolledValue {
            inner: Arc::new(PolledInner {
                task_id: format!("poll:{key}"),
                key,
                engine: self.clone(),
                fetch: Arc::new(move || fetch().boxed()),
                value: Observable::new(None),
                published_at: AtomicI64::new(0),
                phase,
                fetch_lock: tokio::sync::Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub(super) fn task_started(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PollingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("config", &self.config)
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

// ── PolledValue ──────────────────────────────────────────────────

/// Reactive, continuously refreshed value for one key. Clones share state.
pub struct PolledValue<T: PollData> {
    inner: Arc<PolledInner<T>>,
}

struct PolledInner<T: PollData> {
    key: String,
    task_id: String,
    engine: PollingEngine,
    fetch: FetchFn<T>,
    value: Observable<Option<Arc<T>>>,
    /// `lastUpdated` of the envelope currently held in `value`.
    published_at: AtomicI64,
    phase: watch::Sender<PollPhase>,
    /// At most one fetch in flight per key.
    fetch_lock: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    subscribers: usize,
    cancel: Option<CancellationToken>,
}

impl<T: PollData> Clone for PolledValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: PollData> PolledValue<T> {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Latest published data, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.value.get()
    }

    /// Unix ms of the write behind the current value, or 0.
    pub fn last_updated(&self) -> i64 {
        self.inner.published_at.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> PollPhase {
        *self.inner.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<PollPhase> {
        self.inner.phase.subscribe()
    }

    /// Follow published data. Does not start polling on its own.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.inner.value.watch()
    }

    /// Stream of published data. Does not start polling on its own.
    pub fn stream(&self) -> ObservableStream<Option<Arc<T>>> {
        self.inner.value.stream()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_lifecycle().subscribers
    }

    /// Whether a background task is currently attached.
    pub fn is_running(&self) -> bool {
        self.lock_lifecycle()
            .cancel
            .as_ref()
            .is_some_and(|cancel| !cancel.is_cancelled())
    }

    /// Invoke `callback` with every published value, starting with the
    /// current one if there is data. The first subscriber starts polling;
    /// dropping the last subscription stops it.
    pub fn subscribe(&self, callback: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Subscription {
        self.attach();
        let values = self.inner.value.subscribe(move |value| {
            if let Some(value) = value {
                callback(value);
            }
        });
        let this = self.clone();
        Subscription::new(move || {
            drop(values);
            this.detach();
        })
    }

    /// One staleness decision and at most one fetch. Fetches when there
    /// is no data or the data is at least `stale_interval` old; otherwise
    /// republishes what the store holds.
    pub async fn check_and_fetch(&self) -> Result<CheckOutcome, FetchError> {
        self.check(None).await
    }

    // ── Task-facing internals ────────────────────────────────────────

    pub(super) fn engine(&self) -> &PollingEngine {
        &self.inner.engine
    }

    pub(super) async fn check(&self, cancel: Option<&CancellationToken>) -> Result<CheckOutcome, FetchError> {
        let _guard = self.inner.fetch_lock.lock().await;
        let store = &self.inner.engine.store;
        let now = store.clock().now_millis();
        match store.try_get::<T>(&self.inner.key) {
            Some(envelope) if !self.is_stale(&envelope, now) => {
                self.reuse(envelope);
                self.set_phase(PollPhase::Fresh);
                Ok(CheckOutcome::Reused)
            }
            _ => self.fetch_locked(cancel).await.map(|()| CheckOutcome::Fetched),
        }
    }

    /// Fetch without consulting staleness.
    pub(super) async fn force(&self, cancel: Option<&CancellationToken>) -> Result<(), FetchError> {
        let _guard = self.inner.fetch_lock.lock().await;
        self.fetch_locked(cancel).await
    }

    pub(super) fn set_phase(&self, phase: PollPhase) {
        self.inner.phase.send_replace(phase);
    }

    /// Called by the task on exit. A newer task may already be running
    /// if someone subscribed again in the meantime.
    pub(super) fn finish(&self) {
        if self.is_running() {
            return;
        }
        self.set_phase(PollPhase::Stopped);
        if let Some(loading) = &self.inner.engine.loading {
            loading.remove_task(&self.inner.task_id);
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn is_stale(&self, envelope: &StorageEnvelope<T>, now: i64) -> bool {
        let window = duration_millis(self.inner.engine.config.stale_interval);
        !envelope.has_data() || envelope.age_millis(now) >= window
    }

    async fn fetch_locked(&self, cancel: Option<&CancellationToken>) -> Result<(), FetchError> {
        let key = self.inner.key.as_str();
        let loading = self.inner.engine.loading.as_ref();
        let previous = self.phase();

        self.set_phase(PollPhase::Fetching);
        if let Some(loading) = loading {
            loading.start_task(self.inner.task_id.clone(), format!("Refreshing {key}"));
        }

        let result = (self.inner.fetch)().await;

        // The task may have been torn down while the fetch was in flight.
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!(key, "discarding fetch result of stopped task");
            if let Some(loading) = loading {
                loading.remove_task(&self.inner.task_id);
            }
            return Ok(());
        }

        match result {
            Ok(data) => {
                let written = self.inner.engine.store.set(key, &data);
                self.publish(Arc::new(data), written);
                self.set_phase(PollPhase::Fresh);
                if let Some(loading) = loading {
                    loading.complete_task(&self.inner.task_id, None);
                }
                debug!(key, "fetched fresh data");
                Ok(())
            }
            Err(e) => {
                self.set_phase(previous);
                if let Some(loading) = loading {
                    loading.fail_task(&self.inner.task_id, &e, None);
                }
                Err(e)
            }
        }
    }

    /// Republish stored data unless it is already what we hold.
    fn reuse(&self, envelope: StorageEnvelope<T>) {
        if envelope.last_updated != self.last_updated() {
            self.publish(Arc::new(envelope.data), envelope.last_updated);
        }
    }

    fn publish(&self, data: Arc<T>, last_updated: i64) {
        self.inner.published_at.store(last_updated, Ordering::SeqCst);
        self.inner.value.set(Some(data));
    }

    /// Show stored data straight away, without waiting for the network.
    fn seed(&self) {
        let store = &self.inner.engine.store;
        if let Some(envelope) = store.try_get::<T>(&self.inner.key) {
            if envelope.has_data() && envelope.last_updated > self.last_updated() {
                self.publish(Arc::new(envelope.data), envelope.last_updated);
            }
        }
        let phase = if self.get().is_some() {
            PollPhase::Seeded
        } else {
            PollPhase::Uninitialized
        };
        self.set_phase(phase);
    }

    fn attach(&self) {
        let mut lifecycle = self.lock_lifecycle();
        lifecycle.subscribers += 1;
        if lifecycle.subscribers > 1 {
            return;
        }

        self.seed();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.inner.key, "no async runtime, polling disabled");
            return;
        };
        let cancel = CancellationToken::new();
        lifecycle.cancel = Some(cancel.clone());
        drop(lifecycle);

        self.inner.engine.task_started();
        runtime.spawn(task::run(self.clone(), cancel));
        debug!(key = %self.inner.key, "polling task started");
    }

    fn detach(&self) {
        let mut lifecycle = self.lock_lifecycle();
        lifecycle.subscribers = lifecycle.subscribers.saturating_sub(1);
        if lifecycle.subscribers > 0 {
            return;
        }
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
            debug!(key = %self.inner.key, "polling task stopped");
        }
        self.set_phase(PollPhase::Stopped);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: PollData> std::fmt::Debug for PolledValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolledValue")
            .field("key", &self.inner.key)
            .field("phase", &self.phase())
            .field("last_updated", &self.last_updated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::report::default_reporter;
    use crate::storage::MemoryBackend;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Pulls {
        items: Vec<u32>,
    }

    const T0: i64 = 1_700_000_000_000;

    fn engine() -> (PollingEngine, ManualClock) {
        let clock = ManualClock::new(T0);
        let store = DurableStore::from_parts(
            Some(Arc::new(MemoryBackend::new())),
            Arc::new(clock.clone()),
            default_reporter(),
        );
        let engine = PollingEngine::new(store, ManualTrigger::new(), FreshnessConfig::default());
        (engine, clock)
    }

    fn counting_fetch(calls: &Arc<AtomicU32>) -> impl Fn() -> BoxFuture<'static, Result<Pulls, FetchError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(Pulls { items: vec![n] }) }.boxed()
        }
    }

    #[tokio::test]
    async fn staleness_boundary_is_inclusive() {
        let (engine, clock) = engine();
        let calls = Arc::new(AtomicU32::new(0));
        let value = engine.poll("pull-requests-o/r", counting_fetch(&calls));

        assert_eq!(value.check_and_fetch().await.unwrap(), CheckOutcome::Fetched);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(value.check_and_fetch().await.unwrap(), CheckOutcome::Reused);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(1));
        assert_eq!(value.check_and_fetch().await.unwrap(), CheckOutcome::Fetched);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(value.get().unwrap().items, vec![2]);
    }

    #[tokio::test]
    async fn reuse_publishes_stored_data_written_elsewhere() {
        let (engine, _) = engine();
        engine.store().set("k", &Pulls { items: vec![9] });
        let calls = Arc::new(AtomicU32::new(0));
        let value = engine.poll("k", counting_fetch(&calls));

        assert_eq!(value.check_and_fetch().await.unwrap(), CheckOutcome::Reused);
        assert_eq!(value.get().unwrap().items, vec![9]);
        assert_eq!(value.last_updated(), T0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_last_good_value() {
        let (engine, clock) = engine();
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let value = engine.poll("k", move || {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(FetchError::transient("offline"))
                } else {
                    Ok(Pulls { items: vec![1] })
                }
            }
        });

        value.check_and_fetch().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(120));

        let err = value.check_and_fetch().await.unwrap_err();
        assert_eq!(err, FetchError::transient("offline"));
        assert_eq!(value.get().unwrap().items, vec![1]);
        assert_eq!(value.phase(), PollPhase::Fresh);
    }

    #[tokio::test]
    async fn fetches_are_reported_to_loading_tracker() {
        let (engine, _) = engine();
        let tracker = LoadingTracker::new();
        let engine = engine.with_loading(tracker.clone());
        let value = engine.poll("k", || async { Err::<Pulls, _>(FetchError::fatal("gone")) });

        assert!(value.check_and_fetch().await.is_err());
        let task = tracker.get_task("poll:k").unwrap();
        assert_eq!(task.state, crate::loading::LoadingState::Error);
        assert!(tracker.has_error());
    }

    #[test]
    fn phase_display_is_kebab_case() {
        assert_eq!(
            PollPhase::RetryScheduled {
                attempt: 1,
                delay: Duration::ZERO
            }
            .to_string(),
            "retry-scheduled"
        );
        assert_eq!(PollPhase::Fresh.to_string(), "fresh");
    }
}

// ── Composition root ──
//
// Builds one instance of every freshness service and wires them
// together. Applications hold a `FreshnessHub` (or clones of the
// individual services) instead of reaching for globals.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::clock::{Clock, SystemClock};
use crate::config::FreshnessConfig;
use crate::error::FetchError;
use crate::events::{CONFIG_UPDATED, EventBus, REFRESH_REQUESTED};
use crate::loading::{LoadingTracker, PendingRequests};
use crate::poll::{ManualTrigger, PollData, PolledValue, PollingEngine};
use crate::report::{ErrorReporter, default_reporter};
use crate::signal::Subscription;
use crate::storage::{DurableStore, MemoryBackend, StorageBackend};

pub struct FreshnessHub {
    config: FreshnessConfig,
    store: DurableStore,
    cache: CacheService,
    trigger: ManualTrigger,
    loading: LoadingTracker,
    pending: PendingRequests,
    events: EventBus,
    engine: PollingEngine,
    cancel: CancellationToken,
    _bridge: Subscription,
}

impl FreshnessHub {
    pub fn builder(config: FreshnessConfig) -> FreshnessHubBuilder {
        FreshnessHubBuilder {
            config,
            backend: Some(Arc::new(MemoryBackend::new())),
            clock: Arc::new(SystemClock),
            reporter: default_reporter(),
        }
    }

    pub fn config(&self) -> &FreshnessConfig {
        &self.config
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn trigger(&self) -> &ManualTrigger {
        &self.trigger
    }

    pub fn loading(&self) -> &LoadingTracker {
        &self.loading
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn engine(&self) -> &PollingEngine {
        &self.engine
    }

    /// Shorthand for [`PollingEngine::poll`].
    pub fn poll<T, F, Fut>(&self, key: impl Into<String>, fetch: F) -> PolledValue<T>
    where
        T: PollData,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.engine.poll(key, fetch)
    }

    /// Publish `refresh-requested`, which fires the manual trigger.
    pub fn request_refresh(&self) {
        self.events.publish(REFRESH_REQUESTED);
    }

    /// Stop the hub's own background work. Polled values stop when their
    /// last subscriber goes away.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            debug!("shutting down freshness hub");
            self.cancel.cancel();
        }
    }
}

impl Drop for FreshnessHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FreshnessHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessHub")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

// ── Builder ──────────────────────────────────────────────────────

#[must_use]
pub struct FreshnessHubBuilder {
    config: FreshnessConfig,
    backend: Option<Arc<dyn StorageBackend>>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
}

impl FreshnessHubBuilder {
    /// Persist through `backend`. Defaults to an in-memory backend.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Run with no persistent storage at all.
    pub fn without_storage(mut self) -> Self {
        self.backend = None;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Wire everything up. Starts the cache cleanup loop when a tokio
    /// runtime is available and the cleanup interval is non-zero.
    pub fn build(self) -> FreshnessHub {
        let config = self.config;
        let store = DurableStore::from_parts(self.backend, Arc::clone(&self.clock), self.reporter);
        let cache = CacheService::new(&store).with_default_ttl(config.default_cache_ttl);
        let trigger = ManualTrigger::new();
        let loading = LoadingTracker::with_clock(self.clock);
        let pending = PendingRequests::new();
        let events = EventBus::new();
        let engine = PollingEngine::new(store.clone(), trigger.clone(), config).with_loading(loading.clone());

        let bridge = {
            let trigger = trigger.clone();
            events.subscribe(move |event| {
                if event == REFRESH_REQUESTED || event == CONFIG_UPDATED {
                    trigger.fire();
                }
            })
        };

        let cancel = CancellationToken::new();
        if !config.cache_cleanup_interval.is_zero() {
            if tokio::runtime::Handle::try_current().is_ok() {
                cache.spawn_cleanup(config.cache_cleanup_interval, cancel.child_token());
            } else {
                warn!("no async runtime, cache cleanup loop not started");
            }
        }

        FreshnessHub {
            config,
            store,
            cache,
            trigger,
            loading,
            pending,
            events,
            engine,
            cancel,
            _bridge: bridge,
        }
    }
}

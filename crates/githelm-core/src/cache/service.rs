// ── TTL cache service ──
//
// Short-lived memoization of fetched payloads on the same backend the
// durable store uses. Entries live under `cache:{key}` with their own
// envelope shape, so they can never be mistaken for polling envelopes.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::keys::CacheKind;
use crate::clock::{Clock, duration_millis};
use crate::config::DEFAULT_CACHE_TTL;
use crate::error::CoreError;
use crate::report::{ErrorContext, ErrorReporter};
use crate::storage::{DurableStore, StorageBackend};

const COMPONENT: &str = "cache";
const NAMESPACE: &str = "cache:";

/// Persisted as `{"data": <T>, "timestamp": <ms>, "ttl": <ms>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    pub ttl: i64,
}

impl<T> CacheEntry<T> {
    /// Expired iff strictly older than its TTL.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis.saturating_sub(self.timestamp) > self.ttl
    }
}

/// Timestamp and TTL only; `data` is skipped.
#[derive(Deserialize)]
struct EntryMeta {
    timestamp: i64,
    ttl: i64,
}

struct OwnedEntry {
    storage_key: String,
    key: String,
    size: usize,
    meta: Option<EntryMeta>,
}

/// Per-call overrides for [`CacheService::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Diagnostic aggregate returned by [`CacheService::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    /// Sum of the serialized entry sizes in bytes.
    pub total_size: usize,
}

/// Cheaply cloneable TTL cache.
#[derive(Clone)]
pub struct CacheService {
    backend: Option<Arc<dyn StorageBackend>>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
    default_ttl: Duration,
}

impl CacheService {
    /// Share the store's backend, clock, and reporter.
    pub fn new(store: &DurableStore) -> Self {
        Self {
            backend: store.backend().cloned(),
            clock: Arc::clone(store.clock()),
            reporter: Arc::clone(store.reporter()),
            default_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached payload for `key`, or `None` if absent, expired, or unreadable.
    /// Expired entries are deleted on the way out.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let storage_key = storage_key(key);
        let raw = match backend.get_item(&storage_key) {
            Ok(raw) => raw?,
            Err(e) => {
                self.report(&e, "get", key);
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(source) => {
                let err = CoreError::Decode {
                    key: key.to_owned(),
                    source,
                };
                self.report(&err, "get", key);
                return None;
            }
        };

        if entry.is_expired(self.clock.now_millis()) {
            debug!(key, "cache entry expired");
            self.remove_raw(backend.as_ref(), &storage_key, key);
            return None;
        }
        Some(entry.data)
    }

    /// Write a fresh entry stamped with the current time.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, options: CacheOptions) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
            ttl: duration_millis(options.ttl.unwrap_or(self.default_ttl)),
        };
        let written = serde_json::to_string(&entry)
            .map_err(|source| CoreError::Encode {
                key: key.to_owned(),
                source,
            })
            .and_then(|raw| backend.set_item(&storage_key(key), &raw));
        if let Err(e) = written {
            self.report(&e, "set", key);
        }
    }

    pub fn delete(&self, key: &str) {
        if let Some(backend) = self.backend.as_ref() {
            self.remove_raw(backend.as_ref(), &storage_key(key), key);
        }
    }

    /// Remove every cache entry with a known kind prefix. Other keys in
    /// the backend are left alone.
    pub fn clear(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let entries = self.owned_entries(backend.as_ref(), "clear");
        for entry in entries.iter().filter(|e| CacheKind::matches_any(&e.key)) {
            self.remove_raw(backend.as_ref(), &entry.storage_key, &entry.key);
        }
    }

    /// Delete every expired (or unreadable) cache entry, whatever key it
    /// was stored under.
    pub fn cleanup(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let now = self.clock.now_millis();
        let mut removed = 0usize;
        for entry in self.owned_entries(backend.as_ref(), "cleanup") {
            let expired = entry
                .meta
                .as_ref()
                .is_none_or(|meta| now.saturating_sub(meta.timestamp) > meta.ttl);
            if expired {
                self.remove_raw(backend.as_ref(), &entry.storage_key, &entry.key);
                removed += 1;
            }
        }
        debug!(removed, "cache cleanup finished");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Some(backend) = self.backend.as_ref() else {
            return stats;
        };
        let now = self.clock.now_millis();
        for entry in self.owned_entries(backend.as_ref(), "stats") {
            stats.total_entries += 1;
            stats.total_size += entry.size;
            match entry.meta {
                Some(meta) if now.saturating_sub(meta.timestamp) <= meta.ttl => {
                    stats.valid_entries += 1;
                }
                _ => stats.expired_entries += 1,
            }
        }
        stats
    }

    /// Run [`cleanup`](Self::cleanup) every `period` until `cancel` fires.
    pub fn spawn_cleanup(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => cache.cleanup(),
                }
            }
            debug!("cache cleanup loop stopped");
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Every entry this service owns: anything under the namespace that
    /// reads as a cache entry, plus unreadable leftovers under a known
    /// kind prefix.
    fn owned_entries(&self, backend: &dyn StorageBackend, operation: &'static str) -> Vec<OwnedEntry> {
        let keys = match backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                self.reporter
                    .capture(&e, &ErrorContext::new(COMPONENT, operation));
                return Vec::new();
            }
        };
        keys.into_iter()
            .filter_map(|storage_key| {
                let key = storage_key.strip_prefix(NAMESPACE)?.to_owned();
                let raw = match backend.get_item(&storage_key) {
                    Ok(raw) => raw?,
                    Err(e) => {
                        self.report(&e, operation, &key);
                        return None;
                    }
                };
                let meta = parse_meta(&raw);
                (meta.is_some() || CacheKind::matches_any(&key)).then(|| OwnedEntry {
                    size: raw.len(),
                    storage_key,
                    key,
                    meta,
                })
            })
            .collect()
    }

    fn remove_raw(&self, backend: &dyn StorageBackend, storage_key: &str, key: &str) {
        if let Err(e) = backend.remove_item(storage_key) {
            self.report(&e, "delete", key);
        }
    }

    fn report(&self, error: &CoreError, operation: &'static str, key: &str) {
        self.reporter
            .capture(error, &ErrorContext::new(COMPONENT, operation).with_key(key));
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("available", &self.backend.is_some())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

fn storage_key(key: &str) -> String {
    format!("{NAMESPACE}{key}")
}

fn parse_meta(raw: &str) -> Option<EntryMeta> {
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::keys::{CacheKind, cache_key};
    use crate::clock::ManualClock;
    use crate::report::RecordingReporter;
    use crate::storage::MemoryBackend;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    struct Fixture {
        cache: CacheService,
        clock: ManualClock,
        backend: Arc<MemoryBackend>,
        reporter: Arc<RecordingReporter>,
    }

    fn fixture(start: i64) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(start);
        let reporter = Arc::new(RecordingReporter::default());
        let store = DurableStore::from_parts(
            Some(backend.clone()),
            Arc::new(clock.clone()),
            reporter.clone(),
        );
        Fixture {
            cache: CacheService::new(&store),
            clock,
            backend,
            reporter,
        }
    }

    #[test]
    fn set_then_get_returns_data() {
        let fx = fixture(1_000);
        fx.cache.set("pull-requests-o/r", &json!([1, 2]), CacheOptions::default());
        assert_eq!(fx.cache.get::<Value>("pull-requests-o/r"), Some(json!([1, 2])));
    }

    #[test]
    fn default_ttl_is_five_minutes() {
        let fx = fixture(0);
        fx.cache.set("actions-o/r", &1, CacheOptions::default());
        let raw = fx.backend.get_item("cache:actions-o/r").unwrap().unwrap();
        let entry: CacheEntry<i32> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.ttl, 300_000);
        assert_eq!(entry.timestamp, 0);
    }

    #[test]
    fn ttl_boundary_is_exclusive() {
        let fx = fixture(0);
        fx.cache
            .set("actions-o/r", &"x", CacheOptions::ttl(Duration::from_millis(100)));
        fx.clock.set(100);
        assert_eq!(fx.cache.get::<String>("actions-o/r").as_deref(), Some("x"));
        fx.clock.set(101);
        assert_eq!(fx.cache.get::<String>("actions-o/r"), None);
    }

    #[test]
    fn expired_get_deletes_entry() {
        let fx = fixture(0);
        fx.cache
            .set("actions-o/r", &1, CacheOptions::ttl(Duration::from_secs(1)));
        assert_eq!(fx.cache.stats().total_entries, 1);

        fx.clock.advance(Duration::from_secs(2));
        assert_eq!(fx.cache.get::<i32>("actions-o/r"), None);
        assert_eq!(fx.cache.stats().total_entries, 0);
        assert!(fx.backend.is_empty());
    }

    #[test]
    fn corrupt_entry_reads_as_miss_and_is_reported() {
        let fx = fixture(0);
        fx.backend.set_item("cache:actions-o/r", "garbage").unwrap();
        assert_eq!(fx.cache.get::<i32>("actions-o/r"), None);
        assert_eq!(fx.reporter.count(), 1);
    }

    #[test]
    fn clear_only_touches_known_cache_keys() {
        let fx = fixture(0);
        fx.cache.set(&cache_key(CacheKind::PullRequests, "o", "r"), &1, CacheOptions::default());
        fx.cache.set(&cache_key(CacheKind::Actions, "o", "r"), &2, CacheOptions::default());
        fx.cache.set("search-results", &3, CacheOptions::default());
        fx.backend.set_item("pull-requests-o/r", "{\"lastUpdated\":1,\"data\":1}").unwrap();
        fx.backend.set_item("cache:unrelated", "keep").unwrap();
        fx.backend.set_item("settings", "keep").unwrap();

        fx.cache.clear();

        let mut keys = fx.backend.keys().unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["cache:search-results", "cache:unrelated", "pull-requests-o/r", "settings"]
        );
    }

    #[test]
    fn cleanup_reaches_entries_outside_known_kinds() {
        let fx = fixture(0);
        fx.cache
            .set("search-results", &1, CacheOptions::ttl(Duration::from_secs(1)));
        fx.cache
            .set("user-profile", &2, CacheOptions::ttl(Duration::from_secs(60)));
        fx.backend.set_item("cache:unrelated", "keep").unwrap();
        assert_eq!(fx.cache.stats().total_entries, 2);

        fx.clock.advance(Duration::from_secs(5));
        let stats = fx.cache.stats();
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 1);

        fx.cache.cleanup();

        assert_eq!(fx.backend.get_item("cache:search-results").unwrap(), None);
        assert_eq!(fx.cache.get::<i32>("user-profile"), Some(2));
        assert_eq!(fx.backend.get_item("cache:unrelated").unwrap().as_deref(), Some("keep"));
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let fx = fixture(0);
        fx.cache
            .set("actions-o/short", &1, CacheOptions::ttl(Duration::from_secs(1)));
        fx.cache
            .set("actions-o/long", &2, CacheOptions::ttl(Duration::from_secs(60)));
        fx.backend.set_item("cache:actions-o/corrupt", "???").unwrap();
        fx.clock.advance(Duration::from_secs(5));

        fx.cache.cleanup();

        assert_eq!(fx.cache.get::<i32>("actions-o/long"), Some(2));
        assert_eq!(fx.cache.stats().total_entries, 1);
    }

    #[test]
    fn stats_classify_entries() {
        let fx = fixture(0);
        fx.cache
            .set("actions-o/a", &1, CacheOptions::ttl(Duration::from_secs(1)));
        fx.cache
            .set("actions-o/b", &2, CacheOptions::ttl(Duration::from_secs(60)));
        fx.clock.advance(Duration::from_secs(10));

        let stats = fx.cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 1);
        assert!(stats.total_size > 0);
    }

    #[test]
    fn unavailable_backend_is_inert() {
        let cache = CacheService::new(&DurableStore::unavailable());
        cache.set("actions-o/r", &1, CacheOptions::default());
        assert_eq!(cache.get::<i32>("actions-o/r"), None);
        cache.delete("actions-o/r");
        cache.clear();
        cache.cleanup();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_loop_runs_until_cancelled() {
        let fx = fixture(0);
        fx.cache
            .set("actions-o/r", &1, CacheOptions::ttl(Duration::from_secs(1)));
        fx.clock.advance(Duration::from_secs(5));

        let cancel = CancellationToken::new();
        let handle = fx.cache.spawn_cleanup(Duration::from_secs(30), cancel.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fx.cache.stats().total_entries, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}

#![allow(clippy::unwrap_used)]
// Cache service over both backends, driven by a manual clock.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use githelm_core::cache::{cache_key, workflow_jobs_key};
use githelm_core::{
    CacheKind, CacheOptions, CacheService, DurableStore, FileBackend, ManualClock, MemoryBackend,
    StorageBackend, StorageEnvelope, TracingReporter,
};

fn cache_on(backend: Arc<dyn StorageBackend>, start: i64) -> (CacheService, DurableStore, ManualClock) {
    let clock = ManualClock::new(start);
    let store = DurableStore::from_parts(Some(backend), Arc::new(clock.clone()), Arc::new(TracingReporter));
    (CacheService::new(&store), store, clock)
}

#[test]
fn ttl_expiry_deletes_the_entry() {
    let backend = Arc::new(MemoryBackend::new());
    let (cache, _, clock) = cache_on(backend.clone(), 1_000);
    let key = cache_key(CacheKind::Actions, "org", "repo");
    let payload = json!({"workflow_runs": [{"id": 7}]});

    cache.set(&key, &payload, CacheOptions::ttl(Duration::from_millis(5_000)));

    clock.set(4_000);
    assert_eq!(cache.get::<Value>(&key), Some(payload));
    assert_eq!(cache.stats().total_entries, 1);

    clock.set(6_500);
    assert_eq!(cache.get::<Value>(&key), None);
    assert_eq!(cache.stats().total_entries, 0);
    assert!(backend.get_item("cache:actions-org/repo").unwrap().is_none());
}

#[test]
fn cache_and_poll_envelopes_do_not_collide() {
    let (cache, store, _) = cache_on(Arc::new(MemoryBackend::new()), 1_000);
    let key = cache_key(CacheKind::PullRequests, "org", "repo");

    store.set(&key, &json!({"items": [1]}));
    cache.set(&key, &json!(["raw"]), CacheOptions::default());

    let envelope: StorageEnvelope<Value> = store.get(&key);
    assert_eq!(envelope.data, json!({"items": [1]}));
    assert_eq!(cache.get::<Value>(&key), Some(json!(["raw"])));

    cache.clear();
    assert!(store.try_get::<Value>(&key).is_some());
    assert_eq!(cache.get::<Value>(&key), None);
}

#[test]
fn file_backend_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = workflow_jobs_key("org", "repo", 42);

    {
        let backend = Arc::new(FileBackend::new(dir.path()));
        let (cache, _, _) = cache_on(backend, 10_000);
        cache.set(&key, &json!({"jobs": 3}), CacheOptions::default());
    }

    let backend = Arc::new(FileBackend::new(dir.path()));
    let (cache, _, clock) = cache_on(backend, 20_000);
    assert_eq!(cache.get::<Value>(&key), Some(json!({"jobs": 3})));

    let stats = cache.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.valid_entries, 1);

    clock.advance(Duration::from_secs(5 * 60));
    cache.cleanup();
    assert_eq!(cache.stats().total_entries, 0);
}

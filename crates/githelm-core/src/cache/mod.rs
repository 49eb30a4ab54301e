// ── TTL cache ──

mod keys;
mod service;

pub use keys::{CacheKind, InvalidRepoSlug, RepoSlug, cache_key, repo_key, workflow_jobs_key};
pub use service::{CacheEntry, CacheOptions, CacheService, CacheStats};

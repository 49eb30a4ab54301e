// ── Runtime freshness configuration ──
//
// Timing knobs for the polling engine and cache. Built by the binary
// (usually via `githelm-config`) and handed in. Core never reads files.

use std::time::Duration;

/// Default age after which polled data is considered stale.
pub const DEFAULT_STALE_INTERVAL: Duration = Duration::from_secs(60);

/// Default exclusive upper bound for retry jitter.
pub const DEFAULT_RETRY_CEILING: Duration = Duration::from_secs(10);

/// Default cache entry TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default period of the background cache cleanup loop.
pub const DEFAULT_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessConfig {
    /// Polling period and staleness window. Data exactly this old is stale.
    pub stale_interval: Duration,
    /// Retry delays are drawn uniformly from `[0, retry_ceiling)`.
    pub retry_ceiling: Duration,
    /// Quiet period that coalesces bursts of manual-trigger fires. Zero disables.
    pub trigger_debounce: Duration,
    /// TTL applied by `CacheService::set` when none is given.
    pub default_cache_ttl: Duration,
    /// Period of the cache cleanup loop. Zero disables it.
    pub cache_cleanup_interval: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            stale_interval: DEFAULT_STALE_INTERVAL,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            trigger_debounce: Duration::ZERO,
            default_cache_ttl: DEFAULT_CACHE_TTL,
            cache_cleanup_interval: DEFAULT_CACHE_CLEANUP_INTERVAL,
        }
    }
}

//! Data-freshness engine behind the GitHelm dashboard.
//!
//! Everything here is explicitly constructed and shared by cloning
//! handles; there are no globals. [`FreshnessHub`] wires the pieces
//! together:
//!
//! - **[`DurableStore`]** keeps `{lastUpdated, data}` envelopes on a
//!   pluggable [`StorageBackend`] and never fails: unreadable entries are
//!   reported through an [`ErrorReporter`] and read back as empty.
//!
//! - **[`CacheService`]** memoizes payloads with a TTL under its own
//!   `cache:` namespace, with lazy expiry, bulk cleanup, and stats.
//!
//! - **[`PollingEngine`]** turns a key plus an async fetch function into a
//!   [`PolledValue`]: seeded from the store, refetched when stale, retried
//!   with jitter on failure, and refreshed on demand through the shared
//!   [`ManualTrigger`].
//!
//! - **[`LoadingTracker`]** and **[`PendingRequests`]** derive busy/error
//!   status for UI consumers.
//!
//! - **[`EventBus`]** is a single-slot broadcast of coarse application
//!   events such as [`REFRESH_REQUESTED`].

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod loading;
pub mod poll;
pub mod report;
pub mod signal;
pub mod storage;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{CacheKind, CacheOptions, CacheService, CacheStats, RepoSlug};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FreshnessConfig;
pub use error::{CoreError, FetchError};
pub use events::{CONFIG_UPDATED, EventBus, REFRESH_REQUESTED, SAVE_REQUESTED};
pub use hub::{FreshnessHub, FreshnessHubBuilder};
pub use loading::{LoadingState, LoadingTracker, PendingRequests};
pub use poll::{CheckOutcome, ManualTrigger, PollPhase, PolledValue, PollingEngine};
pub use report::{ErrorContext, ErrorReporter, TracingReporter};
pub use signal::{Observable, Subscription};
pub use storage::{DurableStore, FileBackend, MemoryBackend, StorageBackend, StorageEnvelope};

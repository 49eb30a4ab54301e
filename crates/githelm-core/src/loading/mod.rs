// ── Loading state ──
//
// Named-task tracker with a derived global state, and the plain pending
// request counter.

mod pending;
mod tracker;

pub use pending::{PendingRequests, RequestGuard};
pub use tracker::{LoadingState, LoadingTask, LoadingTracker, TaskContext};

// ── Polling engine ──
//
// Per-key fetch-or-reuse cycles driven by staleness, a shared manual
// refresh trigger, and jittered retries.

mod engine;
mod jitter;
mod task;
mod trigger;

pub use engine::{CheckOutcome, FetchFuture, PollData, PollPhase, PolledValue, PollingEngine};
pub use jitter::RetryJitter;
pub use trigger::{ManualTrigger, TriggerState};

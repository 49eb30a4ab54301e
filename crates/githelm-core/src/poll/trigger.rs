// ── Manual refresh trigger ──
//
// One process-wide signal shared by every polling task. A fire is
// identified by its generation, so a task that resets the flag can
// never hide the fire from tasks that have not reacted yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::signal::{Observable, Subscription};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// Set by `fire`, cleared by `reset`.
    pub active: bool,
    /// Bumped by every `fire`.
    pub generation: u64,
}

/// Cheaply cloneable handle to the shared signal.
#[derive(Clone)]
pub struct ManualTrigger {
    state: Observable<TriggerState>,
    generations: Arc<AtomicU64>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self {
            state: Observable::new(TriggerState::default()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ask every active polling task to refetch now.
    pub fn fire(&self) {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.update(|current| TriggerState {
            active: true,
            generation: generation.max(current.generation),
        });
    }

    /// Return to idle. Does not count as a fire.
    pub fn reset(&self) {
        if self.state.get().active {
            self.state.update(|current| TriggerState {
                active: false,
                ..*current
            });
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.get().active
    }

    pub fn state(&self) -> TriggerState {
        self.state.get()
    }

    /// Callback on every state change, starting with the current state.
    pub fn subscribe(&self, callback: impl Fn(&TriggerState) + Send + Sync + 'static) -> Subscription {
        self.state.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<TriggerState> {
        self.state.watch()
    }
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTrigger")
            .field("state", &self.state())
            .finish()
    }
}

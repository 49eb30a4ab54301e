// ── Named loading tasks ──
//
// Concurrent task table with push-based change notification, plus the
// derived global state. Every mutation rebuilds the task snapshot and
// recomputes the global state under one lock so the two never disagree.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// State of a single task, and of the tracker as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadingState {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub message: String,
    /// Percent complete in `[0, 100]`, if the task reports progress.
    pub progress: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingTask {
    pub id: String,
    pub state: LoadingState,
    pub context: TaskContext,
}

/// Cheaply cloneable tracker. Clones share the same task table.
#[derive(Clone)]
pub struct LoadingTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    tasks: DashMap<String, LoadingTask>,
    /// Sorted by id, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<LoadingTask>>>,
    state: watch::Sender<LoadingState>,
    /// Serializes snapshot rebuilds so the last publish always reflects
    /// every mutation that preceded it.
    publish: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl LoadingTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (state, _) = watch::channel(LoadingState::Idle);
        Self {
            inner: Arc::new(TrackerInner {
                tasks: DashMap::new(),
                snapshot,
                state,
                publish: Mutex::new(()),
                clock,
            }),
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Enter `LOADING`. An existing task with the same id is superseded.
    pub fn start_task(&self, id: impl Into<String>, message: impl Into<String>) {
        let id = id.into();
        let task = LoadingTask {
            id: id.clone(),
            state: LoadingState::Loading,
            context: TaskContext {
                message: message.into(),
                progress: None,
                start_time: self.inner.clock.now(),
                end_time: None,
                error: None,
            },
        };
        self.inner.tasks.insert(id, task);
        self.publish();
    }

    /// Enter `SUCCESS`, optionally replacing the message.
    pub fn complete_task(&self, id: &str, message: Option<&str>) {
        let now = self.inner.clock.now();
        self.mutate(id, |task| {
            task.state = LoadingState::Success;
            task.context.end_time = Some(now);
            if let Some(message) = message {
                task.context.message = message.to_owned();
            }
        });
    }

    /// Enter `ERROR`, recording the error text.
    pub fn fail_task(&self, id: &str, error: impl Display, message: Option<&str>) {
        let now = self.inner.clock.now();
        let error = error.to_string();
        self.mutate(id, move |task| {
            task.state = LoadingState::Error;
            task.context.end_time = Some(now);
            task.context.error = Some(error);
            if let Some(message) = message {
                task.context.message = message.to_owned();
            }
        });
    }

    /// Set progress, clamped to `[0, 100]`. Ignored unless the task is
    /// `LOADING`; `NaN` is ignored.
    pub fn update_task_progress(&self, id: &str, percent: f64) {
        if percent.is_nan() {
            return;
        }
        let clamped = percent.clamp(0.0, 100.0);
        let applied = self
            .inner
            .tasks
            .get_mut(id)
            .filter(|task| task.state == LoadingState::Loading)
            .map(|mut task| task.context.progress = Some(clamped))
            .is_some();
        if applied {
            self.publish();
        }
    }

    pub fn remove_task(&self, id: &str) {
        if self.inner.tasks.remove(id).is_some() {
            self.publish();
        }
    }

    pub fn clear_all_tasks(&self) {
        self.inner.tasks.clear();
        self.publish();
    }

    /// Run `fut` as task `id`: `LOADING` before, then `SUCCESS` or
    /// `ERROR` depending on its result, which is returned unchanged.
    pub async fn track<T, E, F>(&self, id: impl Into<String>, message: impl Into<String>, fut: F) -> Result<T, E>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        let id = id.into();
        self.start_task(id.clone(), message);
        let result = fut.await;
        match &result {
            Ok(_) => self.complete_task(&id, None),
            Err(e) => self.fail_task(&id, e, None),
        }
        result
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get_task(&self, id: &str) -> Option<LoadingTask> {
        self.inner.tasks.get(id).map(|r| r.value().clone())
    }

    /// Current snapshot, sorted by id (cheap `Arc` clone).
    pub fn tasks(&self) -> Arc<Vec<LoadingTask>> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe_tasks(&self) -> watch::Receiver<Arc<Vec<LoadingTask>>> {
        self.inner.snapshot.subscribe()
    }

    pub fn state(&self) -> LoadingState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoadingState> {
        self.inner.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state() == LoadingState::Loading
    }

    pub fn has_error(&self) -> bool {
        self.state() == LoadingState::Error
    }

    pub fn is_success(&self) -> bool {
        self.state() == LoadingState::Success
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn mutate(&self, id: &str, f: impl FnOnce(&mut LoadingTask)) {
        let found = self.inner.tasks.get_mut(id).map(|mut task| f(&mut task)).is_some();
        if found {
            self.publish();
        } else {
            debug!(task = id, "ignoring update for unknown loading task");
        }
    }

    fn publish(&self) {
        let _guard = self
            .inner
            .publish
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut tasks: Vec<LoadingTask> = self.inner.tasks.iter().map(|r| r.value().clone()).collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        let global = derive_state(tasks.iter().map(|t| t.state));

        self.inner.snapshot.send_replace(Arc::new(tasks));
        self.inner.state.send_if_modified(|current| {
            let changed = *current != global;
            *current = global;
            changed
        });
    }
}

impl Default for LoadingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingTracker")
            .field("tasks", &self.inner.tasks.len())
            .field("state", &self.state())
            .finish()
    }
}

/// `LOADING > ERROR > SUCCESS > IDLE`.
fn derive_state(states: impl IntoIterator<Item = LoadingState>) -> LoadingState {
    let (mut error, mut success) = (false, false);
    for state in states {
        match state {
            LoadingState::Loading => return LoadingState::Loading,
            LoadingState::Error => error = true,
            LoadingState::Success => success = true,
            LoadingState::Idle => {}
        }
    }
    if error {
        LoadingState::Error
    } else if success {
        LoadingState::Success
    } else {
        LoadingState::Idle
    }
}

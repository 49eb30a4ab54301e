// ── Error capture ──
//
// Non-fatal internal failures (corrupt envelopes, backend I/O) are handed
// to an `ErrorReporter` instead of being returned to callers.

use std::sync::Arc;

use tracing::warn;

use crate::error::CoreError;

/// Where and why a non-fatal error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Component that swallowed the error (`"store"`, `"cache"`, ...).
    pub component: &'static str,
    /// Operation name (`"get"`, `"cleanup"`, ...).
    pub operation: &'static str,
    /// Storage key involved, if any.
    pub key: Option<String>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Error-capture collaborator.
pub trait ErrorReporter: Send + Sync + 'static {
    fn capture(&self, error: &CoreError, context: &ErrorContext);
}

/// Default reporter: a structured `warn!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, error: &CoreError, context: &ErrorContext) {
        warn!(
            component = context.component,
            operation = context.operation,
            key = context.key.as_deref().unwrap_or("-"),
            error = %error,
            "non-fatal error captured"
        );
    }
}

pub(crate) fn default_reporter() -> Arc<dyn ErrorReporter> {
    Arc::new(TracingReporter)
}

/// Reporter that remembers every capture. Test helper.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    pub captured: std::sync::Mutex<Vec<(String, ErrorContext)>>,
}

#[cfg(test)]
impl RecordingReporter {
    #[allow(clippy::unwrap_used)]
    pub fn count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

#[cfg(test)]
impl ErrorReporter for RecordingReporter {
    #[allow(clippy::unwrap_used)]
    fn capture(&self, error: &CoreError, context: &ErrorContext) {
        self.captured
            .lock()
            .unwrap()
            .push((error.to_string(), context.clone()));
    }
}

// ── Durable key-value store ──
//
// Envelope-level access to a `StorageBackend`. No call here ever
// returns an error: backend and parse failures are reported to the
// `ErrorReporter` and read back as the empty envelope.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::backend::StorageBackend;
use super::envelope::StorageEnvelope;
use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::report::{ErrorContext, ErrorReporter, default_reporter};

const COMPONENT: &str = "store";

/// Cheaply cloneable handle to the shared backend.
///
/// A store built with [`DurableStore::unavailable`] has no backend at all,
/// mirroring a context where persistent storage does not exist: reads
/// return defaults and writes are silently dropped.
#[derive(Clone)]
pub struct DurableStore {
    backend: Option<Arc<dyn StorageBackend>>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::from_parts(Some(backend), Arc::new(SystemClock), default_reporter())
    }

    pub fn unavailable() -> Self {
        Self::from_parts(None, Arc::new(SystemClock), default_reporter())
    }

    pub fn from_parts(
        backend: Option<Arc<dyn StorageBackend>>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            backend,
            clock,
            reporter,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    pub(crate) fn backend(&self) -> Option<&Arc<dyn StorageBackend>> {
        self.backend.as_ref()
    }

    /// Read the envelope under `key`, or the empty envelope.
    pub fn get<T: DeserializeOwned + Default>(&self, key: &str) -> StorageEnvelope<T> {
        self.try_get(key).unwrap_or_default()
    }

    /// Read the envelope under `key` if one exists and parses.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Option<StorageEnvelope<T>> {
        let backend = self.backend.as_ref()?;
        let raw = match backend.get_item(key) {
            Ok(raw) => raw?,
            Err(e) => {
                self.report(&e, "get", key);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(envelope) => Some(envelope),
            Err(source) => {
                let err = CoreError::Decode {
                    key: key.to_owned(),
                    source,
                };
                self.report(&err, "get", key);
                None
            }
        }
    }

    /// Persist `{lastUpdated: now, data}` under `key` and return `now`.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) -> i64 {
        let now = self.clock.now_millis();
        let Some(backend) = self.backend.as_ref() else {
            debug!(key, "storage unavailable, dropping write");
            return now;
        };

        let envelope = StorageEnvelope::new(now, data);
        let written = serde_json::to_string(&envelope)
            .map_err(|source| CoreError::Encode {
                key: key.to_owned(),
                source,
            })
            .and_then(|raw| backend.set_item(key, &raw));
        if let Err(e) = written {
            self.report(&e, "set", key);
        }
        now
    }

    pub fn remove(&self, key: &str) {
        if let Some(backend) = self.backend.as_ref() {
            if let Err(e) = backend.remove_item(key) {
                self.report(&e, "remove", key);
            }
        }
    }

    pub fn clear(&self) {
        if let Some(backend) = self.backend.as_ref() {
            if let Err(e) = backend.clear() {
                self.reporter
                    .capture(&e, &ErrorContext::new(COMPONENT, "clear"));
            }
        }
    }

    fn report(&self, error: &CoreError, operation: &'static str, key: &str) {
        self.reporter
            .capture(error, &ErrorContext::new(COMPONENT, operation).with_key(key));
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

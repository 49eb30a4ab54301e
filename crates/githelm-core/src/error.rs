// ── Core error types ──
//
// Two families live here. `CoreError` covers the storage side (backend
// I/O, JSON envelopes). It never escapes the Store or Cache APIs; those
// swallow it, hand it to the `ErrorReporter`, and fall back to defaults.
// `FetchError` is the contract injected fetch functions return, and the
// polling engine's retry policy is driven entirely by its variants.

use thiserror::Error;

/// Storage-side failures.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Backend errors ───────────────────────────────────────────────
    #[error("Storage I/O failed for key '{key}': {source}")]
    StorageIo {
        key: String,
        #[source]
        source: std::io::Error,
    },

    // ── Envelope errors ──────────────────────────────────────────────
    #[error("Could not decode stored value for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by an injected fetch function.
///
/// Classification is the fetch function's job. The engine only asks
/// [`is_retryable`](Self::is_retryable).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network hiccup, 5xx, or anything else worth retrying.
    #[error("transient fetch failure: {message}")]
    Transient { message: String },

    /// HTTP 403/429 from the upstream API.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Credentials rejected. Retrying will not help.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Any other terminal failure.
    #[error("fetch failed: {message}")]
    Fatal { message: String },
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Whether the polling engine keeps retrying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Minimum wait the upstream asked for, if any.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

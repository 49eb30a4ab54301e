//! Configuration for the GitHelm tools.
//!
//! TOML file + `GITHELM_` environment overrides, GitHub token resolution,
//! and translation to the core's runtime types (`FreshnessConfig`,
//! storage backend). The core crate never reads any of this itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use githelm_core::{FileBackend, FreshnessConfig, MemoryBackend, RepoSlug, StorageBackend};

/// Environment variable consulted when no `token_env` is configured.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Repositories to watch when none are given on the command line.
    #[serde(default)]
    pub repositories: Vec<RepoSlug>,

    #[serde(default)]
    pub freshness: FreshnessSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub github: GithubSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FreshnessSection {
    /// Polling period; data this old is refetched.
    #[serde(default = "default_stale_interval_secs")]
    pub stale_interval_secs: u64,

    /// Exclusive upper bound of the retry jitter.
    #[serde(default = "default_retry_ceiling_ms")]
    pub retry_ceiling_ms: u64,

    /// Coalesce manual refreshes fired within this window. 0 disables.
    #[serde(default)]
    pub trigger_debounce_ms: u64,
}

impl Default for FreshnessSection {
    fn default() -> Self {
        Self {
            stale_interval_secs: default_stale_interval_secs(),
            retry_ceiling_ms: default_retry_ceiling_ms(),
            trigger_debounce_ms: 0,
        }
    }
}

fn default_stale_interval_secs() -> u64 {
    60
}
fn default_retry_ceiling_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// 0 disables the background cleanup loop.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_cleanup_interval_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// One JSON file per key; survives restarts.
    #[default]
    File,
    /// Process lifetime only.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageKind,

    /// Directory for the file backend. Defaults to the platform data dir.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Personal access token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            token_env: None,
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "githelm", "githelm")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory of the file storage backend.
pub fn default_storage_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("store"),
        |dirs| dirs.data_dir().join("store"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("githelm");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file is not an error.
///
/// Environment keys are `GITHELM_<SECTION>__<FIELD>`, e.g.
/// `GITHELM_FRESHNESS__STALE_INTERVAL_SECS=30`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GITHELM_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if anything goes wrong.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Translation to runtime types ────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness.stale_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "freshness.stale_interval_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        self.api_url()?;
        Ok(())
    }

    pub fn freshness(&self) -> FreshnessConfig {
        FreshnessConfig {
            stale_interval: Duration::from_secs(self.freshness.stale_interval_secs),
            retry_ceiling: Duration::from_millis(self.freshness.retry_ceiling_ms),
            trigger_debounce: Duration::from_millis(self.freshness.trigger_debounce_ms),
            default_cache_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            cache_cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
        }
    }

    pub fn api_url(&self) -> Result<url::Url, ConfigError> {
        self.github
            .api_url
            .parse()
            .map_err(|_| ConfigError::Validation {
                field: "github.api_url".into(),
                reason: format!("invalid URL: {}", self.github.api_url),
            })
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(default_storage_dir)
    }

    /// The storage backend this config asks for.
    pub fn storage_backend(&self) -> Arc<dyn StorageBackend> {
        match self.storage.backend {
            StorageKind::File => Arc::new(FileBackend::new(self.storage_dir())),
            StorageKind::Memory => Arc::new(MemoryBackend::new()),
        }
    }

    /// A copy with any plaintext token masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.github.token.is_some() {
            copy.github.token = Some("********".into());
        }
        copy
    }

    /// Effective config as TOML, with any plaintext token masked.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve the GitHub token: `token_env` variable, then `GITHUB_TOKEN`,
/// then plaintext. `None` means unauthenticated requests.
pub fn resolve_token(github: &GithubSection) -> Option<SecretString> {
    // 1. Configured env var
    if let Some(ref env_name) = github.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. Conventional env var
    if let Ok(val) = std::env::var(DEFAULT_TOKEN_ENV) {
        if !val.is_empty() {
            return Some(SecretString::from(val));
        }
    }

    // 3. Plaintext in config
    github.token.clone().map(SecretString::from)
}

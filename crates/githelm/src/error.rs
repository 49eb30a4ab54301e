//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use githelm_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Usage ────────────────────────────────────────────────────────

    #[error("No repositories to watch")]
    #[diagnostic(
        code(githelm::no_repositories),
        help(
            "Pass one or more --repo org/repo, or list them in {path}:\n\
             [[repositories]]\n\
             org = \"rust-lang\"\n\
             repo = \"cargo\""
        )
    )]
    NoRepositories { path: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(githelm::config),
        help("Check the config file (githelm config path) and GITHELM_* variables.")
    )]
    Config(#[from] ConfigError),

    // ── HTTP ─────────────────────────────────────────────────────────

    #[error("Could not set up the GitHub client")]
    #[diagnostic(code(githelm::http_client))]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid GitHub token")]
    #[diagnostic(
        code(githelm::invalid_token),
        help("The token contains characters that cannot be sent in an HTTP header.")
    )]
    InvalidToken,

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON: {0}")]
    #[diagnostic(code(githelm::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoRepositories { .. } => exit_code::USAGE,
            Self::Config(_) | Self::InvalidToken => exit_code::CONFIG,
            Self::HttpClient { .. } => exit_code::CONNECTION,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

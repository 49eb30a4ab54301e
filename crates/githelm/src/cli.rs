//! Clap derive structures for the `githelm` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use githelm_core::RepoSlug;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// githelm -- keep an eye on pull requests and CI runs
#[derive(Debug, Parser)]
#[command(
    name = "githelm",
    version,
    about = "Watch GitHub pull requests and workflow runs from the terminal",
    long_about = "Polls the GitHub REST API for the configured repositories, keeps the\n\
        last good response on disk, and refreshes on a schedule or on demand.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// GitHub token (overrides config and GITHUB_TOKEN)
    #[arg(long, env = "GITHELM_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "text", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// One JSON document per line
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll repositories and print updates as they arrive
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Inspect or prune the on-disk response cache
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Repository to watch, as org/repo (repeatable; defaults to config)
    #[arg(long = "repo", short = 'r', value_name = "ORG/REPO")]
    pub repos: Vec<RepoSlug>,

    /// What to watch
    #[arg(long, short = 'k', default_value = "pulls")]
    pub kind: WatchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchKind {
    /// Open pull requests
    Pulls,
    /// Recent workflow runs
    Runs,
}

// ── Cache ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Count total, valid, and expired entries
    Stats,
    /// Delete expired entries
    Cleanup,
    /// Delete every cached response
    Clear,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration (token redacted)
    Show,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}

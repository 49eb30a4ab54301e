//! Integration tests for the `githelm` binary.
//!
//! Argument parsing, completions, config rendering, and the cache
//! commands against a throwaway store. No network access.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `githelm` binary with env isolation.
///
/// Points HOME and the XDG dirs at `home` and clears every variable the
/// binary reads, so tests never touch the user's real configuration.
fn githelm_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("githelm");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITHELM_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// A memory-backed store would forget entries between invocations; the
/// cache tests need a file store in a known place.
fn with_file_store(cmd: &mut assert_cmd::Command, dir: &Path) {
    cmd.env("GITHELM_STORAGE__BACKEND", "file")
        .env("GITHELM_STORAGE__PATH", dir);
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = githelm_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("cache"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("githelm"));
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Watch ───────────────────────────────────────────────────────────

#[test]
fn test_watch_without_repositories_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .args(["watch"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No repositories"));
}

#[test]
fn test_watch_rejects_malformed_slug() {
    let home = tempfile::tempdir().unwrap();
    let output = githelm_cmd(home.path())
        .args(["watch", "--repo", "not-a-slug"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("org/repo"), "Expected slug hint:\n{text}");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_without_file_renders_defaults() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("stale_interval_secs = 60")
                .and(predicate::str::contains("https://api.github.com")),
        );
}

#[test]
fn test_config_show_redacts_token() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .env("GITHELM_GITHUB__TOKEN", "ghp_supersecret")
        .args(["--output", "json", "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ghp_supersecret")
                .not()
                .and(predicate::str::contains("********")),
        );
}

#[test]
fn test_config_path_ends_in_config_toml() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let home = tempfile::tempdir().unwrap();
    githelm_cmd(home.path())
        .env("GITHELM_FRESHNESS__STALE_INTERVAL_SECS", "0")
        .args(["cache", "stats"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("stale_interval_secs"));
}

// ── Cache ───────────────────────────────────────────────────────────

#[test]
fn test_cache_stats_on_empty_store() {
    let home = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let mut cmd = githelm_cmd(home.path());
    with_file_store(&mut cmd, store.path());
    cmd.args(["--output", "json", "cache", "stats"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"totalEntries\":0")
                .and(predicate::str::contains("\"expiredEntries\":0")),
        );
}

#[test]
fn test_cache_clear_leaves_foreign_files_alone() {
    let home = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let entry = r#"{"data":[],"timestamp":1,"ttl":1}"#;
    // `cache:pull-requests-o/r` and a key the cache does not own.
    std::fs::write(store.path().join("cache%3Apull-requests-o%2Fr.json"), entry).unwrap();
    std::fs::write(store.path().join("settings.json"), "{}").unwrap();

    let mut cmd = githelm_cmd(home.path());
    with_file_store(&mut cmd, store.path());
    cmd.args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 1"));

    assert!(!store.path().join("cache%3Apull-requests-o%2Fr.json").exists());
    assert!(store.path().join("settings.json").exists());
}

#[test]
fn test_cache_cleanup_removes_expired_entries() {
    let home = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    std::fs::write(
        store.path().join("cache%3Aactions-o%2Fr.json"),
        r#"{"data":{},"timestamp":1,"ttl":1000}"#,
    )
    .unwrap();

    let mut cmd = githelm_cmd(home.path());
    with_file_store(&mut cmd, store.path());
    cmd.args(["cache", "cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 expired"));

    assert!(!store.path().join("cache%3Aactions-o%2Fr.json").exists());
}

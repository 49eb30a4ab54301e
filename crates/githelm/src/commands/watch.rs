//! `githelm watch`: poll repositories and print every published value.
//!
//! stdin drives the manual trigger: a line `r` publishes
//! `refresh-requested`, `q` quits. Ctrl-C also quits.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use githelm_config::{Config, config_path, resolve_token};
use githelm_core::cache::repo_key;
use githelm_core::poll::PollData;
use githelm_core::{
    CacheKind, FreshnessHub, LoadingState, LoadingTracker, PolledValue, RepoSlug, Subscription,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs, WatchKind};
use crate::error::CliError;
use crate::github::{GithubClient, PullRequest, WorkflowRun};
use crate::output::{self, Painter};

pub async fn handle(args: WatchArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let repos = if args.repos.is_empty() {
        config.repositories.clone()
    } else {
        args.repos
    };
    if repos.is_empty() {
        return Err(CliError::NoRepositories {
            path: config_path().display().to_string(),
        });
    }

    let freshness = config.freshness();
    let hub = FreshnessHub::builder(freshness)
        .backend(config.storage_backend())
        .build();

    let token = global
        .token
        .clone()
        .map(SecretString::from)
        .or_else(|| resolve_token(&config.github));
    let client = Arc::new(GithubClient::new(
        config.api_url()?,
        token.as_ref(),
        hub.cache().clone(),
        freshness.default_cache_ttl,
    )?);

    let painter = Painter::new(global.color);
    let mut subscriptions = Vec::with_capacity(repos.len());
    for slug in repos {
        let sub = match args.kind {
            WatchKind::Pulls => {
                let fetch_client = Arc::clone(&client);
                let fetch_slug = slug.clone();
                let value = hub.poll(repo_key(CacheKind::PullRequests, &slug), move || {
                    let client = Arc::clone(&fetch_client);
                    let slug = fetch_slug.clone();
                    async move { client.open_pulls(&slug).await }
                });
                print_updates(&hub, value, slug, global.output, painter, render_pulls)
            }
            WatchKind::Runs => {
                let fetch_client = Arc::clone(&client);
                let fetch_slug = slug.clone();
                let value = hub.poll(repo_key(CacheKind::WorkflowRuns, &slug), move || {
                    let client = Arc::clone(&fetch_client);
                    let slug = fetch_slug.clone();
                    async move { client.workflow_runs(&slug).await }
                });
                print_updates(&hub, value, slug, global.output, painter, render_runs)
            }
        };
        subscriptions.push(sub);
    }

    let status = tokio::spawn(report_failures(hub.loading().clone(), painter));
    info!(repos = subscriptions.len(), "watching; 'r' refreshes, 'q' quits");
    read_commands(&hub).await?;

    status.abort();
    drop(subscriptions);
    hub.shutdown();
    Ok(())
}

// ── Rendering ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Update<'a, T> {
    repo: String,
    last_updated: i64,
    items: &'a T,
}

fn print_updates<T, R>(
    hub: &FreshnessHub,
    value: PolledValue<T>,
    slug: RepoSlug,
    format: OutputFormat,
    painter: Painter,
    render: R,
) -> Subscription
where
    T: PollData,
    R: Fn(&T, Painter) -> String + Send + Sync + 'static,
{
    let clock = Arc::clone(hub.store().clock());
    let source = value.clone();
    value.subscribe(move |items| {
        let last_updated = source.last_updated();
        let result = output::emit(
            format,
            &Update {
                repo: slug.to_string(),
                last_updated,
                items: items.as_ref(),
            },
            |update| {
                format!(
                    "{} {}\n{}",
                    painter.heading(&update.repo),
                    painter.dim(&format!(
                        "({})",
                        output::staleness_hint(last_updated, clock.now_millis())
                    )),
                    render(update.items, painter)
                )
            },
        );
        if let Err(e) = result {
            debug!(error = %e, "could not render update");
        }
    })
}

#[allow(clippy::ptr_arg)]
fn render_pulls(pulls: &Vec<PullRequest>, painter: Painter) -> String {
    if pulls.is_empty() {
        return format!("  {}", painter.dim("no open pull requests"));
    }
    pulls
        .iter()
        .map(|pr| {
            let author = pr.user.as_ref().map_or("ghost", |u| u.login.as_str());
            let draft = if pr.draft { painter.dim(" [draft]") } else { String::new() };
            format!("  #{:<6} {}{} {}", pr.number, pr.title, draft, painter.dim(&format!("@{author}")))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::ptr_arg)]
fn render_runs(runs: &Vec<WorkflowRun>, painter: Painter) -> String {
    if runs.is_empty() {
        return format!("  {}", painter.dim("no workflow runs"));
    }
    runs.iter()
        .map(|run| {
            let outcome = match (run.status.as_deref(), run.conclusion.as_deref()) {
                (_, Some("success")) => painter.good("success"),
                (_, Some(other)) => painter.bad(other),
                (Some(status), None) => status.to_owned(),
                (None, None) => "unknown".to_owned(),
            };
            format!(
                "  {:<10} {:<24} {} {}",
                run.id,
                run.name.as_deref().unwrap_or("-"),
                outcome,
                painter.dim(run.head_branch.as_deref().unwrap_or(""))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Status & input ───────────────────────────────────────────────────

/// Print failing fetches whenever the aggregate state turns to error.
async fn report_failures(loading: LoadingTracker, painter: Painter) {
    let mut state = loading.subscribe_state();
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if current != LoadingState::Error {
            continue;
        }
        for task in loading.tasks().iter() {
            if let Some(error) = &task.context.error {
                eprintln!("{} {}", painter.bad(&task.id), error);
            }
        }
    }
}

/// Handle stdin commands until `q` or Ctrl-C. Once stdin closes only
/// Ctrl-C ends the watch.
async fn read_commands(hub: &FreshnessHub) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => match line? {
                None => stdin_open = false,
                Some(line) => match line.trim() {
                    "r" => hub.request_refresh(),
                    "q" => return Ok(()),
                    "" => {}
                    other => debug!(input = other, "ignoring unknown command"),
                },
            },
        }
    }
}

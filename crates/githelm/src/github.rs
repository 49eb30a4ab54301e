// Thin GitHub REST client feeding the polling engine.
//
// Every call returns `FetchError`, classified so the engine's retry policy
// does the right thing: 401 is terminal, 403/429 are rate limits, anything
// else on the wire is transient. Every call goes to the network; successful
// responses are then written to the cache for `cache stats` and offline
// inspection, never served from it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use githelm_core::cache::repo_key;
use githelm_core::{CacheKind, CacheOptions, CacheService, FetchError, RepoSlug};

use crate::error::CliError;

const USER_AGENT: &str = concat!("githelm/", env!("CARGO_PKG_VERSION"));

// ── Response shapes ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
    pub user: Option<User>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: Option<String>,
    pub head_branch: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub html_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowRunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

// ── Client ───────────────────────────────────────────────────────────

pub struct GithubClient {
    http: reqwest::Client,
    base_url: Url,
    cache: CacheService,
    cache_ttl: Duration,
}

impl GithubClient {
    /// Successful responses are recorded in `cache` with `cache_ttl`.
    pub fn new(
        base_url: Url,
        token: Option<&SecretString>,
        cache: CacheService,
        cache_ttl: Duration,
    ) -> Result<Self, CliError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| CliError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| CliError::HttpClient { source })?;

        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
            cache,
            cache_ttl,
        })
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /repos/{org}/{repo}/pulls?state=open`
    pub async fn open_pulls(&self, slug: &RepoSlug) -> Result<Vec<PullRequest>, FetchError> {
        let key = repo_key(CacheKind::PullRequests, slug);
        let path = format!("repos/{}/{}/pulls", slug.org, slug.repo);
        self.fetch_and_record(&key, &path, &[("state", "open")]).await
    }

    /// `GET /repos/{org}/{repo}/actions/runs`
    pub async fn workflow_runs(&self, slug: &RepoSlug) -> Result<Vec<WorkflowRun>, FetchError> {
        let key = repo_key(CacheKind::WorkflowRuns, slug);
        let path = format!("repos/{}/{}/actions/runs", slug.org, slug.repo);
        let page: WorkflowRunsPage = self
            .fetch_and_record(&key, &path, &[("per_page", "20")])
            .await?;
        Ok(page.workflow_runs)
    }

    // ── Plumbing ─────────────────────────────────────────────────────

    async fn fetch_and_record<T>(
        &self,
        key: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
    {
        let value: T = self.get(path, query).await?;
        self.cache.set(key, &value, CacheOptions::ttl(self.cache_ttl));
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| FetchError::fatal(format!("bad request path {path}: {e}")))?;
        debug!("GET {url}");

        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify(status, resp).await);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            FetchError::fatal(format!("{e} (body preview: {preview:?})"))
        })
    }
}

/// Ensure the base path ends with `/` so relative joins append.
fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn classify(status: StatusCode, resp: reqwest::Response) -> FetchError {
    let retry_after_secs = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match status {
        StatusCode::UNAUTHORIZED => {
            let raw = resp.text().await.unwrap_or_default();
            FetchError::Unauthorized {
                message: if raw.is_empty() { status.to_string() } else { raw },
            }
        }
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::RateLimited { retry_after_secs }
        }
        _ => FetchError::transient(format!("HTTP {status}")),
    }
}

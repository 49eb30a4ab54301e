// ── Cache key conventions ──
//
// Key formats are part of the persisted-state schema:
//   "{kind}-{org}/{repo}"
//   "workflow-jobs-{org}/{repo}-{runId}"
// `CacheService::clear` relies on the kind prefixes to decide which
// entries it owns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Kinds of payload the dashboard memoizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString)]
pub enum CacheKind {
    #[strum(serialize = "pull-requests")]
    PullRequests,
    #[strum(serialize = "actions")]
    Actions,
    #[strum(serialize = "workflow-runs")]
    WorkflowRuns,
    #[strum(serialize = "workflow-jobs")]
    WorkflowJobs,
}

impl CacheKind {
    /// Key prefix including the trailing dash, e.g. `"pull-requests-"`.
    pub fn prefix(self) -> String {
        format!("{}-", self.as_ref())
    }

    /// Does `key` belong to any known kind?
    pub fn matches_any(key: &str) -> bool {
        Self::iter().any(|kind| key.starts_with(&kind.prefix()))
    }
}

/// `org/repo` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoSlug {
    pub org: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(org: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 'org/repo', got '{0}'")]
pub struct InvalidRepoSlug(pub String);

impl FromStr for RepoSlug {
    type Err = InvalidRepoSlug;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((org, repo))
                if !org.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self::new(org, repo))
            }
            _ => Err(InvalidRepoSlug(s.to_owned())),
        }
    }
}

/// `"{kind}-{org}/{repo}"`
pub fn cache_key(kind: CacheKind, org: &str, repo: &str) -> String {
    format!("{kind}-{org}/{repo}")
}

/// `"workflow-jobs-{org}/{repo}-{run_id}"`
pub fn workflow_jobs_key(org: &str, repo: &str, run_id: u64) -> String {
    format!("{}-{org}/{repo}-{run_id}", CacheKind::WorkflowJobs)
}

/// [`cache_key`] for a [`RepoSlug`].
pub fn repo_key(kind: CacheKind, slug: &RepoSlug) -> String {
    cache_key(kind, &slug.org, &slug.repo)
}

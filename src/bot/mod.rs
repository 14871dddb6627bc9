use axum::async_trait;
use chrono::{DateTime, Utc};

use crate::github::{
    CheckRun, CommitSha, GithubRepoName, InstallationId, PullRequest, PullRequestNumber,
};

pub mod event;
mod handlers;
pub mod router;

pub use handlers::create_router;
pub use handlers::FAILURE_LABEL;
pub use router::{ActionFilter, EventRouter, WebhookHandler};

/// Provides functionality for working with remote repositories of a single app installation.
/// It is behind a trait to allow easier mocking in tests.
#[async_trait]
pub trait GithubClient: Send + Sync {
    /// Find the open pull request that contains the given commit, if there is any.
    async fn pull_request_for_commit(
        &self,
        repo: &GithubRepoName,
        sha: &CommitSha,
    ) -> anyhow::Result<Option<PullRequest>>;

    /// Return all check runs recorded for the given commit.
    async fn check_runs_for_commit(
        &self,
        repo: &GithubRepoName,
        sha: &CommitSha,
    ) -> anyhow::Result<Vec<CheckRun>>;

    /// Add a set of labels to a PR.
    async fn add_labels(
        &self,
        repo: &GithubRepoName,
        pr: PullRequestNumber,
        labels: &[String],
    ) -> anyhow::Result<()>;

    /// Remove a set of labels from a PR.
    async fn remove_labels(
        &self,
        repo: &GithubRepoName,
        pr: PullRequestNumber,
        labels: &[String],
    ) -> anyhow::Result<()>;

    /// Rate limit status observed on the last response, if any.
    fn rate_limit(&self) -> Option<RateLimit>;
}

/// Creates API clients scoped to a single installation of the GitHub App.
pub trait ClientFactory: Send + Sync {
    fn installation_client(
        &self,
        installation: InstallationId,
    ) -> anyhow::Result<Box<dyn GithubClient>>;
}

/// Remaining GitHub API budget of an installation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

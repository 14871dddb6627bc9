//! Contains definitions of common types (pull request, check run, repository name) needed
//! for working with GitHub repositories.
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

pub mod api;
pub mod server;
mod webhook;

pub use webhook::{GitHubWebhook, WebhookSecret};

/// Unique identifier of a GitHub repository
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct GithubRepoName {
    owner: String,
    name: String,
}

impl GithubRepoName {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_lowercase(),
            name: name.to_lowercase(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for GithubRepoName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}/{}", self.owner, self.name))
    }
}

impl FromStr for GithubRepoName {
    type Err = anyhow::Error;

    /// Parses the `<owner>/<name>` form used by the `full_name` field of GitHub payloads.
    fn from_str(full_name: &str) -> Result<Self, Self::Err> {
        match full_name.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(owner, name))
            }
            _ => Err(anyhow::anyhow!("Invalid repository name `{full_name}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(transparent)]
pub struct CommitSha(pub String);

impl From<String> for CommitSha {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl AsRef<str> for CommitSha {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}
impl Display for CommitSha {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PullRequestNumber(pub u64);

impl From<u64> for PullRequestNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for PullRequestNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <u64 as Display>::fmt(&self.0, f)
    }
}

/// Identifies an installation of the GitHub App, i.e. the set of repositories that the bot
/// can access with a single access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(transparent)]
pub struct InstallationId(pub u64);

impl Display for InstallationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <u64 as Display>::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug)]
pub struct PullRequest {
    pub number: PullRequestNumber,
    pub head_sha: CommitSha,
    pub state: String,
    pub labels: Vec<String>,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
}

impl CheckRunStatus {
    /// Returns true if the check run has not reached its final state yet.
    pub fn is_pending(self) -> bool {
        !matches!(self, CheckRunStatus::Completed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunConclusion {
    Success,
    Failure,
    TimedOut,
    Neutral,
    Cancelled,
    Skipped,
    ActionRequired,
    Stale,
    StartupFailure,
}

/// A single GitHub check run (e.g. one CI job) attached to a commit.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct CheckRun {
    #[serde(default)]
    pub name: String,
    pub head_sha: CommitSha,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckRunConclusion>,
}

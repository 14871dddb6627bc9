use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::async_trait;
use chrono::DateTime;
use http::header::{ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, StatusCode};
use octocrab::{Error, Octocrab};
use serde::de::DeserializeOwned;

use crate::bot::{GithubClient, RateLimit};
use crate::github::api::cache::{CachedResponse, ResponseCache};
use crate::github::{CheckRun, CommitSha, GithubRepoName, PullRequest, PullRequestNumber};

/// Maximum page size allowed by the GitHub REST API.
const PAGE_SIZE: usize = 100;

/// Provides access to the repositories of a single app installation using the GitHub API.
pub struct GithubInstallationClient {
    /// The client caches the access token for this installation and refreshes it once it
    /// expires.
    client: Octocrab,
    cache: Arc<ResponseCache>,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GithubInstallationClient {
    pub fn new(client: Octocrab, cache: Arc<ResponseCache>) -> Self {
        Self {
            client,
            cache,
            rate_limit: Mutex::new(None),
        }
    }

    /// Performs a GET request, revalidating a cached response with its `ETag` if there is one.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let cached = self.cache.get(path);

        let mut headers = HeaderMap::new();
        if let Some(ref cached) = cached {
            headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&cached.etag)?);
        }

        let response = self
            .client
            ._get_with_headers(path, Some(headers))
            .await
            .with_context(|| format!("Request GET {path} failed"))?;
        if let Some(rate_limit) = parse_rate_limit(response.headers()) {
            *self
                .rate_limit
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(rate_limit);
        }

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match cached {
            Some(cached) if status == StatusCode::NOT_MODIFIED => {
                tracing::trace!("Using cached response for {path}");
                cached.body
            }
            _ if status.is_success() => {
                let body = self.client.body_to_string(response).await?;
                if let Some(etag) = etag {
                    self.cache.insert(
                        path.to_string(),
                        CachedResponse {
                            etag,
                            body: body.clone(),
                        },
                    );
                }
                body
            }
            _ => {
                let text = self.client.body_to_string(response).await.unwrap_or_default();
                return Err(anyhow::anyhow!("Request GET {path} failed ({status}): {text}"));
            }
        };

        serde_json::from_str(&body).with_context(|| format!("Cannot deserialize response of {path}"))
    }
}

#[derive(serde::Deserialize, Debug)]
struct PullRequestHead {
    sha: CommitSha,
}

#[derive(serde::Deserialize, Debug)]
struct PullRequestLabel {
    name: String,
}

#[derive(serde::Deserialize, Debug)]
struct PullRequestPayload {
    number: u64,
    state: String,
    head: PullRequestHead,
    #[serde(default)]
    labels: Vec<PullRequestLabel>,
}

#[derive(serde::Deserialize, Debug)]
struct CheckRunsResponse {
    total_count: usize,
    check_runs: Vec<CheckRun>,
}

#[async_trait]
impl GithubClient for GithubInstallationClient {
    async fn pull_request_for_commit(
        &self,
        repo: &GithubRepoName,
        sha: &CommitSha,
    ) -> anyhow::Result<Option<PullRequest>> {
        // https://docs.github.com/en/rest/commits/commits#list-pull-requests-associated-with-a-commit
        let prs: Vec<PullRequestPayload> = self
            .get_json(&format!("/repos/{repo}/commits/{sha}/pulls"))
            .await?;
        Ok(select_pull_request(prs))
    }

    async fn check_runs_for_commit(
        &self,
        repo: &GithubRepoName,
        sha: &CommitSha,
    ) -> anyhow::Result<Vec<CheckRun>> {
        // https://docs.github.com/en/rest/checks/runs#list-check-runs-for-a-git-reference
        let mut check_runs = Vec::new();
        let mut page = 1;
        loop {
            let response: CheckRunsResponse = self
                .get_json(&format!(
                    "/repos/{repo}/commits/{sha}/check-runs?per_page={PAGE_SIZE}&page={page}"
                ))
                .await?;
            let received = response.check_runs.len();
            check_runs.extend(response.check_runs);
            if received < PAGE_SIZE || check_runs.len() >= response.total_count {
                break;
            }
            page += 1;
        }
        Ok(check_runs)
    }

    async fn add_labels(
        &self,
        repo: &GithubRepoName,
        pr: PullRequestNumber,
        labels: &[String],
    ) -> anyhow::Result<()> {
        let client = self.client.issues(repo.owner(), repo.name());
        if !labels.is_empty() {
            client
                .add_labels(pr.0, labels)
                .await
                .context("Cannot add label(s) to PR")?;
        }

        Ok(())
    }

    async fn remove_labels(
        &self,
        repo: &GithubRepoName,
        pr: PullRequestNumber,
        labels: &[String],
    ) -> anyhow::Result<()> {
        let client = self.client.issues(repo.owner(), repo.name());
        // The GitHub API only allows removing labels one by one, so we remove all of them in
        // parallel to speed it up a little.
        let labels_to_remove_futures = labels.iter().map(|label| client.remove_label(pr.0, label));
        futures::future::join_all(labels_to_remove_futures)
            .await
            .into_iter()
            .filter(|result| match result {
                Ok(_) => false,
                Err(error) => match error {
                    // Removing a label that is not on the issue is a no-op for us.
                    Error::GitHub { source, .. }
                        if source.message.contains("Label does not exist") =>
                    {
                        tracing::trace!("Trying to remove label which does not exist on PR {pr}");
                        false
                    }
                    _ => true,
                },
            })
            .collect::<Result<Vec<_>, _>>()
            .context("Cannot remove label(s) from PR")?;

        Ok(())
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        *self
            .rate_limit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Picks the open pull request that a commit belongs to.
fn select_pull_request(prs: Vec<PullRequestPayload>) -> Option<PullRequest> {
    prs.into_iter()
        .find(|pr| pr.state == "open")
        .map(|pr| PullRequest {
            number: pr.number.into(),
            head_sha: pr.head.sha,
            state: pr.state,
            labels: pr.labels.into_iter().map(|label| label.name).collect(),
        })
}

fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let header = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.parse().ok() };
    let remaining = header("x-ratelimit-remaining")?;
    let reset = header("x-ratelimit-reset")?;
    Some(RateLimit {
        remaining: u64::try_from(remaining).ok()?,
        reset: DateTime::from_timestamp(reset, 0)?,
    })
}

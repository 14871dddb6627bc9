use std::collections::HashSet;

use anyhow::Context;
use axum::async_trait;
use itertools::Itertools;
use tracing::Instrument;

use crate::bot::event::{CheckRunCompleted, WebhookEvent};
use crate::bot::router::WebhookHandler;
use crate::bot::GithubClient;
use crate::github::{CheckRun, CheckRunConclusion, CheckRunStatus, PullRequest};

/// Label that marks pull requests with failing checks.
pub const FAILURE_LABEL: &str = "Status: Tests are failing";

/// Keeps the failure label of a pull request in sync with the outcome of all check runs of its
/// head commit.
///
/// GitHub sends a `completed` event for every check run of a commit, so this handler runs many
/// times for a single commit. Only the event of the last check run to finish gets past the
/// pending gate and modifies labels.
pub(super) struct CheckRunCompletedHandler {
    label: String,
}

impl CheckRunCompletedHandler {
    pub(super) fn new(label: String) -> Self {
        Self { label }
    }
}

#[async_trait]
impl WebhookHandler for CheckRunCompletedHandler {
    async fn handle(&self, event: &WebhookEvent, client: &dyn GithubClient) -> anyhow::Result<()> {
        let payload = CheckRunCompleted::from_event(event)?;
        let span = tracing::info_span!(
            "Check run completed",
            repo = payload.repository.to_string(),
            sha = payload.commit_sha.to_string(),
            check = payload.check_run_name
        );
        handle_check_run_completed(client, payload, &self.label)
            .instrument(span)
            .await
    }
}

async fn handle_check_run_completed(
    client: &dyn GithubClient,
    payload: CheckRunCompleted,
    label: &str,
) -> anyhow::Result<()> {
    let repo = &payload.repository;
    let sha = &payload.commit_sha;

    let Some(pr) = client
        .pull_request_for_commit(repo, sha)
        .await
        .with_context(|| format!("Cannot find pull request for {repo}@{sha}"))?
    else {
        tracing::info!("This commit is not from a PR: https://api.github.com/repos/{repo}/commits/{sha}");
        return Ok(());
    };

    let check_runs = client
        .check_runs_for_commit(repo, sha)
        .await
        .with_context(|| format!("Cannot load check runs for {repo}@{sha}"))?;

    match decide(&check_runs, &pr, label) {
        LabelAction::Pending => {
            tracing::debug!("Some check runs of PR {} are still running", pr.number);
        }
        LabelAction::Add => {
            tracing::info!(
                "Failure detected in PR {} (check runs: {})",
                pr.number,
                check_runs
                    .iter()
                    .filter(|run| is_failure(run.conclusion))
                    .map(|run| run.name.as_str())
                    .join(", ")
            );
            client
                .add_labels(repo, pr.number, &[label.to_string()])
                .await
                .with_context(|| format!("Cannot add label to PR {repo}#{}", pr.number))?;
        }
        LabelAction::Remove => {
            tracing::info!("All check runs of PR {} have passed", pr.number);
            client
                .remove_labels(repo, pr.number, &[label.to_string()])
                .await
                .with_context(|| format!("Cannot remove label from PR {repo}#{}", pr.number))?;
        }
        LabelAction::Unchanged => {
            tracing::debug!("Labels of PR {} are up to date", pr.number);
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LabelAction {
    /// At least one check run has not finished yet.
    Pending,
    Add,
    Remove,
    Unchanged,
}

/// Decides what should happen with `label` on `pr`, given all check runs of its head commit.
fn decide(check_runs: &[CheckRun], pr: &PullRequest, label: &str) -> LabelAction {
    let statuses: HashSet<CheckRunStatus> = check_runs.iter().map(|run| run.status).collect();
    if statuses.iter().any(|status| status.is_pending()) {
        return LabelAction::Pending;
    }

    let conclusions: HashSet<Option<CheckRunConclusion>> =
        check_runs.iter().map(|run| run.conclusion).collect();
    let failing = conclusions.iter().any(|conclusion| is_failure(*conclusion));

    match (failing, pr.has_label(label)) {
        (true, false) => LabelAction::Add,
        (false, true) => LabelAction::Remove,
        _ => LabelAction::Unchanged,
    }
}

/// A completed check run without a conclusion is treated as a failure.
fn is_failure(conclusion: Option<CheckRunConclusion>) -> bool {
    matches!(
        conclusion,
        None | Some(CheckRunConclusion::Failure) | Some(CheckRunConclusion::TimedOut)
    )
}

use std::fmt::{Display, Formatter};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::github::{CommitSha, GithubRepoName, InstallationId};

/// Type of a GitHub webhook event, taken from the `X-GitHub-Event` header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Ping,
    CheckRun,
    Other(String),
}

impl EventType {
    pub fn parse(name: &str) -> Self {
        match name {
            "ping" => EventType::Ping,
            "check_run" => EventType::CheckRun,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::Ping => "ping",
            EventType::CheckRun => "check_run",
            EventType::Other(name) => name,
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single webhook delivery received from GitHub.
#[derive(Debug)]
pub struct WebhookEvent {
    pub event_type: EventType,
    /// The `action` field of the payload, if the event type has one.
    pub action: Option<String>,
    pub delivery_id: String,
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event_type: EventType, delivery_id: String, payload: serde_json::Value) -> Self {
        let action = payload
            .get("action")
            .and_then(|action| action.as_str())
            .map(|action| action.to_string());
        Self {
            event_type,
            action,
            delivery_id,
            payload,
        }
    }

    /// Returns the installation that this event was sent for.
    pub fn installation_id(&self) -> Result<InstallationId, PayloadError> {
        let id = self
            .payload
            .pointer("/installation/id")
            .ok_or(PayloadError::MissingField("installation.id"))?;
        id.as_u64()
            .map(InstallationId)
            .ok_or(PayloadError::InvalidField {
                field: "installation.id",
                reason: format!("expected an integer, found {id}"),
            })
    }
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Field `{0}` is missing from the payload")]
    MissingField(&'static str),
    #[error("Field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A check run of some commit has been completed.
#[derive(Debug)]
pub struct CheckRunCompleted {
    pub repository: GithubRepoName,
    pub installation_id: InstallationId,
    pub commit_sha: CommitSha,
    pub check_run_name: String,
}

#[derive(serde::Deserialize)]
struct CheckRunPayload {
    check_run: CheckRunInner,
    installation: InstallationInner,
    repository: RepositoryInner,
}

#[derive(serde::Deserialize)]
struct CheckRunInner {
    head_sha: CommitSha,
    #[serde(default)]
    name: String,
}

#[derive(serde::Deserialize)]
struct InstallationInner {
    id: InstallationId,
}

#[derive(serde::Deserialize)]
struct RepositoryInner {
    full_name: String,
}

impl CheckRunCompleted {
    pub fn from_event(event: &WebhookEvent) -> anyhow::Result<Self> {
        let payload = CheckRunPayload::deserialize(&event.payload)
            .context("Cannot parse check run payload")?;
        let repository = payload
            .repository
            .full_name
            .parse()
            .map_err(|error: anyhow::Error| PayloadError::InvalidField {
                field: "repository.full_name",
                reason: error.to_string(),
            })?;

        Ok(Self {
            repository,
            installation_id: payload.installation.id,
            commit_sha: payload.check_run.head_sha,
            check_run_name: payload.check_run.name,
        })
    }
}

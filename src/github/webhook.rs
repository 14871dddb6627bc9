use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::bot::event::{EventType, WebhookEvent};
use crate::github::server::ServerStateRef;

/// GitHub never sends webhook payloads larger than 25 MB.
const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// axum extractor for GitHub webhook events.
#[derive(Debug)]
pub struct GitHubWebhook(pub WebhookEvent);

/// Extracts a webhook event from a HTTP request.
#[async_trait]
impl FromRequest<ServerStateRef> for GitHubWebhook {
    type Rejection = StatusCode;

    async fn from_request(
        request: Request,
        state: &ServerStateRef,
    ) -> Result<Self, Self::Rejection> {
        let (parts, body) = request.into_parts();

        // Eagerly load body
        let body = axum::body::to_bytes(body, WEBHOOK_BODY_LIMIT)
            .await
            .map_err(|error| {
                tracing::error!("Parsing webhook body failed: {error:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        // Verify that the request is valid
        if let Some(secret) = state.get_webhook_secret() {
            if !verify_gh_signature(&parts.headers, &body, secret) {
                tracing::error!("Webhook request failed, could not authenticate webhook");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        // Parse webhook content
        match parse_webhook_event(&parts.headers, &body) {
            Ok(event) => Ok(GitHubWebhook(event)),
            Err(error) => {
                tracing::error!("Cannot parse webhook event: {error}");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Header {0} not found")]
    MissingHeader(&'static str),
    #[error("Header {0} is not valid UTF-8")]
    InvalidHeader(&'static str),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

fn parse_webhook_event(headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let event_type = header_str(headers, "x-github-event")?
        .ok_or(WebhookError::MissingHeader("x-github-event"))?;
    let delivery_id = header_str(headers, "x-github-delivery")?.unwrap_or_default();
    let payload: serde_json::Value = serde_json::from_slice(body)?;

    Ok(WebhookEvent::new(
        EventType::parse(event_type),
        delivery_id.to_string(),
        payload,
    ))
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, WebhookError> {
    headers
        .get(name)
        .map(|value| value.to_str().map_err(|_| WebhookError::InvalidHeader(name)))
        .transpose()
}

type HmacSha256 = Hmac<Sha256>;

/// Verifies that the request is properly signed by GitHub with SHA-256 and the passed `secret`.
fn verify_gh_signature(
    headers: &HeaderMap<HeaderValue>,
    body: &[u8],
    secret: &WebhookSecret,
) -> bool {
    let Some(signature) = headers.get("x-hub-signature-256").map(|v| v.as_bytes()) else {
        return false;
    };
    let Some(signature) = signature
        .strip_prefix(b"sha256=")
        .and_then(|v| hex::decode(v).ok())
    else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.expose().as_bytes()).expect("Cannot create HMAC key");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Wrapper for a secret which is zeroed on drop and can be exposed only through the [`WebhookSecret::expose`] method.
pub struct WebhookSecret(SecretString);

impl WebhookSecret {
    pub fn new(secret: String) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret().as_str()
    }
}

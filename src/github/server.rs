use std::any::Any;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::Instrument;

use crate::bot::event::{EventType, WebhookEvent};
use crate::bot::{ClientFactory, EventRouter};
use crate::config::BotConfig;
use crate::github::webhook::{GitHubWebhook, WebhookSecret};
use crate::utils::logging::LogError;

/// Shared server state for all axum handlers.
pub struct ServerState {
    router: EventRouter,
    clients: Arc<dyn ClientFactory>,
    webhook_secret: Option<WebhookSecret>,
    config: BotConfig,
}

impl ServerState {
    pub fn new(
        router: EventRouter,
        clients: Arc<dyn ClientFactory>,
        webhook_secret: Option<WebhookSecret>,
        config: BotConfig,
    ) -> Self {
        Self {
            router,
            clients,
            webhook_secret,
            config,
        }
    }

    pub fn get_webhook_secret(&self) -> Option<&WebhookSecret> {
        self.webhook_secret.as_ref()
    }
}

pub type ServerStateRef = Arc<ServerState>;

pub fn create_app(state: ServerState) -> Router {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route("/health", get(health_handler))
        .layer(ConcurrencyLimitLayer::new(100))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(Arc::new(state))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Webhook handler panicked: {err:?}");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "")
}

/// Axum handler that receives a webhook and dispatches it to the event handlers.
pub async fn github_webhook_handler(
    State(state): State<ServerStateRef>,
    GitHubWebhook(event): GitHubWebhook,
) -> impl IntoResponse {
    let span = tracing::info_span!(
        "Webhook",
        event = %event.event_type,
        action = ?event.action,
        delivery = event.delivery_id
    );
    match handle_webhook(&state, event).instrument(span.clone()).await {
        Ok(()) => StatusCode::OK,
        Err(error) => {
            span.log_error(error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn handle_webhook(state: &ServerState, event: WebhookEvent) -> anyhow::Result<()> {
    if event.event_type == EventType::Ping {
        tracing::info!("Received ping");
        return Ok(());
    }
    if !state.router.handles(&event) {
        tracing::debug!("Ignoring event without a registered handler");
        return Ok(());
    }

    let installation = event.installation_id()?;
    let client = state
        .clients
        .installation_client(installation)
        .with_context(|| format!("Cannot create client for installation {installation}"))?;

    // Give GitHub some time to reach internal consistency.
    tokio::time::sleep(state.config.consistency_delay).await;
    state.router.dispatch(&event, client.as_ref()).await?;

    if let Some(rate_limit) = client.rate_limit() {
        tracing::info!(
            "GH requests remaining: {}, reset time: {}",
            rate_limit.remaining,
            rate_limit.reset.format("%b-%d-%Y %H:%M:%S %Z")
        );
    }
    tracing::info!("Handled GH delivery {}", event.delivery_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::{create_app, ServerState};
    use crate::bot::event::{EventType, WebhookEvent};
    use crate::bot::{ActionFilter, EventRouter, GithubClient, WebhookHandler, FAILURE_LABEL};
    use crate::github::{CheckRunConclusion, WebhookSecret};
    use crate::tests::event::completed;
    use crate::tests::io::load_test_file;
    use crate::tests::mocks::{TestClientFactory, TestGithubClient};
    use crate::tests::state::{test_config, BotTester, TEST_SECRET};
    use crate::tests::webhook::sign_payload;

    fn request(event: &str, body: &str, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", event)
            .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
            .header("x-hub-signature-256", signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn signed_request(event: &str, file: &str) -> Request<Body> {
        let body = load_test_file(file);
        let signature = sign_payload(TEST_SECRET, body.as_bytes());
        request(event, &body, &signature)
    }

    #[tokio::test]
    async fn ping_is_not_dispatched() {
        let tester = BotTester::default();
        let response = tester
            .app()
            .oneshot(signed_request("ping", "webhook/ping.json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tester.created_clients(), 0);
    }

    #[tokio::test]
    async fn unhandled_event_is_ignored() {
        let tester = BotTester::default();
        let response = tester
            .app()
            .oneshot(signed_request("push", "webhook/push.json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tester.created_clients(), 0);
    }

    #[tokio::test]
    async fn check_run_completed_adds_label() {
        let tester = BotTester::default();
        tester.client().set_check_runs(&[
            completed(CheckRunConclusion::Success),
            completed(CheckRunConclusion::Failure),
        ]);
        let response = tester
            .app()
            .oneshot(signed_request(
                "check_run",
                "webhook/check-run-completed.json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tester.created_clients(), 1);
        tester.client().check_added_labels(1, &[FAILURE_LABEL]);
    }

    #[tokio::test]
    async fn handler_error_returns_500() {
        let tester = BotTester::default();
        tester.client().fail_check_runs("Server Error");
        let response = tester
            .app()
            .oneshot(signed_request(
                "check_run",
                "webhook/check-run-completed.json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
        tester.client().check_no_mutations();
    }

    #[tokio::test]
    async fn missing_installation_returns_500() {
        let tester = BotTester::default();
        let body = r#"{"action": "completed", "check_run": {"head_sha": "abc"}}"#;
        let signature = sign_payload(TEST_SECRET, body.as_bytes());
        let response = tester
            .app()
            .oneshot(request("check_run", body, &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tester.created_clients(), 0);
    }

    #[tokio::test]
    async fn invalid_signature_returns_500() {
        let tester = BotTester::default();
        let body = load_test_file("webhook/check-run-completed.json");
        let response = tester
            .app()
            .oneshot(request("check_run", &body, "sha256=00"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tester.created_clients(), 0);
        tester.client().check_no_mutations();
    }

    #[tokio::test]
    async fn malformed_webhook_returns_500() {
        let tester = BotTester::default();
        let body = "{not json";
        let mut request = request("check_run", body, &sign_payload(TEST_SECRET, body.as_bytes()));
        request.headers_mut().remove("x-github-event");
        let response = tester.app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
        assert_eq!(tester.created_clients(), 0);
    }

    struct PanickingHandler;

    #[async_trait]
    impl WebhookHandler for PanickingHandler {
        async fn handle(
            &self,
            _event: &WebhookEvent,
            _client: &dyn GithubClient,
        ) -> anyhow::Result<()> {
            panic!("handler exploded");
        }
    }

    #[tokio::test]
    async fn panicking_handler_returns_500() {
        let config = test_config();
        let mut router = EventRouter::new();
        router.register(EventType::CheckRun, ActionFilter::Any, PanickingHandler);
        let app = create_app(ServerState::new(
            router,
            Arc::new(TestClientFactory::new(Arc::new(TestGithubClient::default()))),
            Some(WebhookSecret::new(TEST_SECRET.to_string())),
            config,
        ));
        let response = app
            .oneshot(signed_request(
                "check_run",
                "webhook/check-run-completed.json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health() {
        let tester = BotTester::default();
        let response = tester
            .app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

use axum::async_trait;

use crate::bot::event::{EventType, WebhookEvent};
use crate::bot::GithubClient;

/// Reacts to a single kind of webhook event.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent, client: &dyn GithubClient) -> anyhow::Result<()>;
}

/// Selects which actions of an event type a handler is interested in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionFilter {
    Any,
    Exact(String),
}

impl ActionFilter {
    pub fn exact(action: &str) -> Self {
        Self::Exact(action.to_string())
    }

    fn matches(&self, action: Option<&str>) -> bool {
        match self {
            ActionFilter::Any => true,
            ActionFilter::Exact(expected) => action == Some(expected.as_str()),
        }
    }
}

struct Route {
    event_type: EventType,
    action: ActionFilter,
    handler: Box<dyn WebhookHandler>,
}

/// Maps webhook events to the handlers that should react to them.
#[derive(Default)]
pub struct EventRouter {
    routes: Vec<Route>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: WebhookHandler + 'static>(
        &mut self,
        event_type: EventType,
        action: ActionFilter,
        handler: H,
    ) -> &mut Self {
        self.routes.push(Route {
            event_type,
            action,
            handler: Box::new(handler),
        });
        self
    }

    /// Returns true if at least one handler is registered for the given event.
    pub fn handles(&self, event: &WebhookEvent) -> bool {
        self.matching(event).next().is_some()
    }

    /// Executes all handlers registered for the event, one after another, in registration
    /// order. The first failing handler stops the dispatch.
    pub async fn dispatch(
        &self,
        event: &WebhookEvent,
        client: &dyn GithubClient,
    ) -> anyhow::Result<()> {
        for route in self.matching(event) {
            tracing::trace!(
                "Dispatching {} ({:?}) to handler registered for {:?}",
                event.event_type,
                event.action,
                route.action
            );
            route.handler.handle(event, client).await?;
        }
        Ok(())
    }

    fn matching<'a>(&'a self, event: &'a WebhookEvent) -> impl Iterator<Item = &'a Route> + 'a {
        self.routes.iter().filter(move |route| {
            route.event_type == event.event_type && route.action.matches(event.action.as_deref())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::async_trait;
    use serde_json::json;

    use super::{ActionFilter, EventRouter, WebhookHandler};
    use crate::bot::event::{EventType, WebhookEvent};
    use crate::bot::GithubClient;
    use crate::tests::mocks::TestGithubClient;

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl WebhookHandler for Recorder {
        async fn handle(
            &self,
            _event: &WebhookEvent,
            _client: &dyn GithubClient,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(self.name);
            if self.fail {
                return Err(anyhow::anyhow!("{} failed", self.name));
            }
            Ok(())
        }
    }

    fn recorder(
        calls: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        fail: bool,
    ) -> Recorder {
        Recorder {
            name,
            calls: calls.clone(),
            fail,
        }
    }

    fn check_run_event(action: &str) -> WebhookEvent {
        WebhookEvent::new(
            EventType::CheckRun,
            "delivery".to_string(),
            json!({ "action": action }),
        )
    }

    #[tokio::test]
    async fn dispatch_in_registration_order() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut router = EventRouter::new();
        router
            .register(
                EventType::CheckRun,
                ActionFilter::Any,
                recorder(&calls, "any", false),
            )
            .register(
                EventType::CheckRun,
                ActionFilter::exact("completed"),
                recorder(&calls, "completed", false),
            )
            .register(
                EventType::CheckRun,
                ActionFilter::exact("created"),
                recorder(&calls, "created", false),
            )
            .register(
                EventType::Other("pull_request".to_string()),
                ActionFilter::Any,
                recorder(&calls, "pr", false),
            );

        let event = check_run_event("completed");
        assert!(router.handles(&event));
        router
            .dispatch(&event, &Arc::new(TestGithubClient::default()))
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["any", "completed"]);
    }

    #[tokio::test]
    async fn dispatch_without_match_is_noop() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut router = EventRouter::new();
        router.register(
            EventType::CheckRun,
            ActionFilter::exact("completed"),
            recorder(&calls, "completed", false),
        );

        let event = check_run_event("rerequested");
        assert!(!router.handles(&event));
        router
            .dispatch(&event, &Arc::new(TestGithubClient::default()))
            .await
            .unwrap();

        let event = WebhookEvent::new(EventType::Ping, "delivery".to_string(), json!({}));
        router
            .dispatch(&event, &Arc::new(TestGithubClient::default()))
            .await
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exact_filter_requires_action() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut router = EventRouter::new();
        router.register(
            EventType::CheckRun,
            ActionFilter::exact("completed"),
            recorder(&calls, "completed", false),
        );
        let event = WebhookEvent::new(EventType::CheckRun, "delivery".to_string(), json!({}));
        assert!(!router.handles(&event));
    }

    #[tokio::test]
    async fn failing_handler_aborts_dispatch() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut router = EventRouter::new();
        router
            .register(
                EventType::CheckRun,
                ActionFilter::Any,
                recorder(&calls, "first", true),
            )
            .register(
                EventType::CheckRun,
                ActionFilter::Any,
                recorder(&calls, "second", false),
            );

        let result = router
            .dispatch(&check_run_event("completed"), &Arc::new(TestGithubClient::default()))
            .await;
        assert_eq!(result.unwrap_err().to_string(), "first failed");
        assert_eq!(*calls.lock().unwrap(), vec!["first"]);
    }
}

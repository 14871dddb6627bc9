use crate::bot::event::EventType;
use crate::bot::router::{ActionFilter, EventRouter};
use crate::config::BotConfig;

use check_runs::CheckRunCompletedHandler;

mod check_runs;

pub use check_runs::FAILURE_LABEL;

/// Creates the router with all event handlers of the bot.
pub fn create_router(config: &BotConfig) -> EventRouter {
    let mut router = EventRouter::new();
    router.register(
        EventType::CheckRun,
        ActionFilter::exact("completed"),
        CheckRunCompletedHandler::new(config.failure_label.clone()),
    );
    router
}

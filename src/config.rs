use std::time::Duration;

use crate::bot::FAILURE_LABEL;

/// Time given to GitHub to reach internal consistency before the bot queries resources
/// related to a webhook event.
pub const DEFAULT_CONSISTENCY_DELAY: Duration = Duration::from_secs(1);

/// Runtime configuration of the bot.
#[derive(Clone, Debug)]
pub struct BotConfig {
    /// Label added to pull requests whose check runs have failed.
    pub failure_label: String,
    /// Delay between receiving a webhook and dispatching it to the handlers.
    pub consistency_delay: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            failure_label: FAILURE_LABEL.to_string(),
            consistency_delay: DEFAULT_CONSISTENCY_DELAY,
        }
    }
}

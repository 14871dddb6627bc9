//! This is the library of the CI labeler bot.
//!
//! The bot receives GitHub webhooks and keeps a "tests are failing" label on pull requests
//! in sync with the outcome of their check runs.
pub mod bot;
pub mod config;
pub mod github;
pub mod utils;

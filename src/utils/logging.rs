use anyhow::Error;
use itertools::Itertools;
use tracing::span::Span;

pub trait LogError {
    /// Logs the error, together with all of its causes, inside this span.
    fn log_error(&self, error: Error);
}

impl LogError for Span {
    fn log_error(&self, error: Error) {
        let causes = error.chain().skip(1).join(": ");
        self.in_scope(|| {
            if causes.is_empty() {
                tracing::error!("Error: {error}");
            } else {
                tracing::error!("Error: {error} (caused by: {causes})");
            }
        });
    }
}

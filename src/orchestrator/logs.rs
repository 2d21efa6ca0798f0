//! Recent and streaming container output.

use super::with_timeout;
use crate::error::OrchestratorError;
use crate::runtime::{ContainerRuntime, LogStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reads worker output through a [`ContainerRuntime`].
pub struct LogReader {
    runtime: Arc<dyn ContainerRuntime>,
    call_timeout: Duration,
    default_tail: usize,
    max_tail: usize,
}

impl LogReader {
    /// Creates a reader. `tail` values are clamped to `1..=max_tail`.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        call_timeout: Duration,
        default_tail: usize,
        max_tail: usize,
    ) -> Self {
        Self {
            runtime,
            call_timeout,
            default_tail,
            max_tail: max_tail.max(1),
        }
    }

    /// Resolves a requested line count.
    #[must_use]
    pub fn effective_tail(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_tail)
            .clamp(1, self.max_tail)
    }

    /// Last `tail` lines of combined stdout/stderr.
    ///
    /// `Ok(None)` means the container does not exist; `Ok(Some(""))` means it
    /// exists but has produced no output.
    ///
    /// # Errors
    /// Runtime failures and `Timeout`.
    pub async fn logs(
        &self,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<Option<String>, OrchestratorError> {
        let tail = self.effective_tail(tail);
        let logs = with_timeout(
            "fetch_logs",
            self.call_timeout,
            self.runtime.logs(bot_id, tail),
        )
        .await?;
        debug!(bot_id = %bot_id, tail, found = logs.is_some(), "Logs fetched");
        Ok(logs)
    }

    /// Follows the output, starting with the last `tail` lines.
    ///
    /// Only opening the stream is bounded by the call timeout.
    ///
    /// # Errors
    /// Runtime failures and `Timeout`.
    pub async fn follow(
        &self,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<Option<LogStream>, OrchestratorError> {
        let tail = self.effective_tail(tail);
        with_timeout(
            "follow_logs",
            self.call_timeout,
            self.runtime.follow_logs(bot_id, tail),
        )
        .await
    }
}

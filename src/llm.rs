//! Completion provider abstraction
//!
//! A streaming chat-completions client and the incremental decoder for its
//! event stream.

pub mod decoder;
mod error;
mod openai;
mod types;

#[cfg(test)]
mod proptests;

pub use error::{LlmError, LlmErrorKind};
pub use openai::{OpenAIService, DEFAULT_COMPLETIONS_URL};
pub use types::*;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One streaming completion call per invocation
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send `messages`, forwarding each decoded fragment to `on_progress` and
    /// calling it once more with [`Progress::Done`] when the stream ends.
    ///
    /// Returns the concatenation of every forwarded fragment. On error no
    /// `Done` is sent.
    async fn dispatch(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
        on_progress: &OnProgress<'_>,
    ) -> Result<String, LlmError>;

    /// Provider name, for logs
    fn provider(&self) -> &'static str;
}

/// Logging wrapper for completion services
pub struct LoggingService {
    inner: Arc<dyn CompletionService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn CompletionService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CompletionService for LoggingService {
    async fn dispatch(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
        on_progress: &OnProgress<'_>,
    ) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let fragments = AtomicUsize::new(0);
        let counting = |progress: Progress<'_>| {
            if matches!(progress, Progress::Delta(_)) {
                fragments.fetch_add(1, Ordering::Relaxed);
            }
            on_progress(progress);
        };

        let result = self.inner.dispatch(messages, cancel, &counting).await;
        let duration = start.elapsed();

        match &result {
            Ok(text) => {
                tracing::info!(
                    provider = self.inner.provider(),
                    duration_ms = %duration.as_millis(),
                    messages = messages.len(),
                    fragments = fragments.load(Ordering::Relaxed),
                    chars = text.chars().count(),
                    "Completion finished"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(
                    provider = self.inner.provider(),
                    duration_ms = %duration.as_millis(),
                    fragments = fragments.load(Ordering::Relaxed),
                    "Completion cancelled"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = self.inner.provider(),
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    status = ?e.status,
                    "Completion failed"
                );
            }
        }

        result
    }

    fn provider(&self) -> &'static str {
        self.inner.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCompletionService;

    #[tokio::test]
    async fn test_logging_service_forwards_progress_and_result() {
        let mock = Arc::new(MockCompletionService::new());
        mock.queue_reply(&["a", "b"]);
        let service = LoggingService::new(mock.clone());

        let seen = parking_lot::Mutex::new(Vec::new());
        let text = service
            .dispatch(
                &[Message::user("q")],
                CancellationToken::new(),
                &|p: Progress<'_>| {
                    seen.lock().push(format!("{p:?}"));
                },
            )
            .await
            .unwrap();

        assert_eq!(text, "ab");
        assert_eq!(
            seen.into_inner(),
            vec!["Delta(\"a\")", "Delta(\"b\")", "Done"]
        );
        assert_eq!(mock.recorded_requests(), vec![vec![Message::user("q")]]);
    }
}

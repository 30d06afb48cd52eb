//! Request router
//!
//! Entry point for every frontend command. Plain commands are answered
//! synchronously; streaming commands are acknowledged at once and run in a
//! spawned task whose events go only to the frontend that sent them.

mod command;
mod subscription;

pub use command::{Command, CommandReply, OutboundEvent};

use crate::chat::{ChatError, ConversationManager};
use crate::llm::{CompletionService, LlmError, Message, Progress};
use crate::settings::{SettingsError, SettingsStore};
use std::sync::Arc;
use subscription::{InFlight, Outcome, StreamKind, Subscription};
use thiserror::Error;
use uuid::Uuid;

/// Prefix for text the user selected before asking a question
pub const SELECTION_PREFIX: &str = "The following is the text selected by the user:\n";

/// Prefix for page content attached to a chat turn
pub const PAGE_CONTEXT_PREFIX: &str =
    "The following is the content of the webpage the user is currently viewing:\n";

/// Page content beyond this many characters is cut off
pub const PAGE_CONTEXT_MAX_CHARS: usize = 10_000;

/// Terminal error for a job that ended without reporting an outcome
const JOB_ABORTED: &str = "Request aborted";

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No frontend is connected to receive the response")]
    TargetUnavailable,
    #[error("Request {0} is already in flight")]
    DuplicateRequest(String),
    #[error("No request in flight with id {0}")]
    UnknownRequest(String),
}

/// Delivery of events to a frontend addressed by target id
pub trait EventSink: Send + Sync {
    fn is_available(&self, target: &str) -> bool;
    fn deliver(&self, target: &str, event: OutboundEvent) -> Result<(), RouterError>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn is_available(&self, target: &str) -> bool {
        (**self).is_available(target)
    }

    fn deliver(&self, target: &str, event: OutboundEvent) -> Result<(), RouterError> {
        (**self).deliver(target, event)
    }
}

#[derive(Error, Debug)]
enum JobError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl JobError {
    fn is_cancelled(&self) -> bool {
        match self {
            JobError::Chat(ChatError::Llm(e)) | JobError::Llm(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Work behind a streaming command
enum StreamJob {
    Chat {
        chat_id: String,
        message: String,
        context: Option<Message>,
        page_content: Option<String>,
    },
    Inline {
        prompt: String,
    },
    Question {
        question: String,
        context: Option<String>,
    },
}

impl StreamJob {
    fn kind(&self) -> StreamKind {
        match self {
            StreamJob::Chat { chat_id, .. } => StreamKind::Chat {
                chat_id: chat_id.clone(),
            },
            StreamJob::Inline { .. } => StreamKind::Inline,
            StreamJob::Question { .. } => StreamKind::Question,
        }
    }
}

/// Messages for a question about selected text
pub fn question_messages(question: &str, selection: Option<&str>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(selection) = selection.filter(|s| !s.is_empty()) {
        messages.push(Message::system(format!("{SELECTION_PREFIX}{selection}")));
    }
    messages.push(Message::user(question));
    messages
}

/// Context message for the page being viewed, cut to [`PAGE_CONTEXT_MAX_CHARS`]
pub fn page_context_message(page_content: &str) -> Message {
    let page: String = page_content.chars().take(PAGE_CONTEXT_MAX_CHARS).collect();
    Message::system(format!("{PAGE_CONTEXT_PREFIX}{page}"))
}

pub struct RequestRouter {
    manager: Arc<ConversationManager>,
    completions: Arc<dyn CompletionService>,
    settings: SettingsStore,
    sink: Arc<dyn EventSink>,
    in_flight: InFlight,
}

impl RequestRouter {
    pub fn new(
        manager: Arc<ConversationManager>,
        completions: Arc<dyn CompletionService>,
        settings: SettingsStore,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            manager,
            completions,
            settings,
            sink,
            in_flight: InFlight::default(),
        }
    }

    /// Number of streaming requests that have not finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Handle one command. `origin` is the target id of the sending
    /// frontend; streaming commands without a connected origin are refused.
    pub async fn handle(self: &Arc<Self>, command: Command, origin: Option<&str>) -> CommandReply {
        let action = command.action();
        tracing::debug!(action, origin = ?origin, "Command received");

        match command {
            Command::ContinueChat {
                chat_id,
                message,
                context,
                page_content,
                request_id,
            } => self.start_stream(
                origin,
                request_id,
                StreamJob::Chat {
                    chat_id,
                    message,
                    // Context always goes out as a system message
                    context: context.map(|context| Message::system(context.content)),
                    page_content,
                },
            ),
            Command::InlineCompletion { prompt, request_id } => {
                self.start_stream(origin, request_id, StreamJob::Inline { prompt })
            }
            Command::AskQuestionWithContext {
                question,
                context,
                request_id,
            } => self.start_stream(origin, request_id, StreamJob::Question { question, context }),
            Command::GetChatHistory { chat_id } => match self.manager.history(&chat_id).await {
                Ok(history) => CommandReply::ok().with_history(history),
                Err(e) => failure(action, &e),
            },
            Command::GetChatList => match self.manager.list().await {
                Ok(list) => CommandReply::ok().with_chat_list(list),
                Err(e) => failure(action, &e),
            },
            Command::RenameChat { chat_id, new_title } => {
                match self.manager.rename(&chat_id, &new_title).await {
                    Ok(()) => CommandReply::ok(),
                    Err(e) => failure(action, &e),
                }
            }
            Command::DeleteChat { chat_id } => match self.manager.delete(&chat_id).await {
                Ok(()) => CommandReply::ok(),
                Err(e) => failure(action, &e),
            },
            Command::GetSettings => match self.settings.load().await {
                Ok(settings) => CommandReply::ok().with_settings(settings.view()),
                Err(e) => failure(action, &e),
            },
            Command::SaveSettings(update) => match self.settings.update(update).await {
                Ok(settings) => CommandReply::ok().with_settings(settings.view()),
                Err(e) => failure(action, &e),
            },
            Command::CancelRequest { request_id } => match self.in_flight.cancel(&request_id) {
                Ok(()) => {
                    tracing::info!(request_id = %request_id, "Cancellation requested");
                    CommandReply::ok().with_request_id(request_id)
                }
                Err(e) => CommandReply::failed(e.to_string()).with_request_id(request_id),
            },
        }
    }

    fn start_stream(
        self: &Arc<Self>,
        origin: Option<&str>,
        request_id: Option<String>,
        job: StreamJob,
    ) -> CommandReply {
        let request_id = request_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let kind = job.kind();

        let Some(target) = origin.filter(|target| self.sink.is_available(target)) else {
            let error = RouterError::TargetUnavailable.to_string();
            tracing::warn!(
                request_id = %request_id,
                kind = kind.name(),
                origin = ?origin,
                "Refusing streaming request without a connected frontend"
            );
            let event = kind.terminal(&request_id, Outcome::Failed(error.clone()));
            return CommandReply::failed(error)
                .with_request_id(request_id)
                .with_event(event);
        };

        let subscription = Subscription::new(
            request_id.clone(),
            target.to_string(),
            kind,
            self.sink.clone(),
        );
        let subscription = match self.in_flight.open(subscription) {
            Ok(subscription) => subscription,
            Err(e) => return CommandReply::failed(e.to_string()).with_request_id(request_id),
        };

        tracing::info!(
            request_id = %request_id,
            kind = subscription.kind().name(),
            target_id = %target,
            "Streaming request started"
        );

        let guard = JobGuard {
            router: Arc::clone(self),
            subscription,
        };
        tokio::spawn(async move {
            let outcome = guard.router.run_job(job, &guard.subscription).await;
            guard.router.finish(&guard.subscription, outcome);
        });

        CommandReply::ok().with_request_id(request_id)
    }

    async fn run_job(&self, job: StreamJob, subscription: &Subscription) -> Result<(), JobError> {
        let on_progress = |progress: Progress<'_>| {
            if let Progress::Delta(text) = progress {
                subscription.emit_partial(text);
            }
        };
        let cancel = subscription.cancel_token();

        match job {
            StreamJob::Chat {
                chat_id,
                message,
                context,
                page_content,
            } => {
                let context = match context {
                    Some(context) => Some(context),
                    None => self.page_context(page_content).await?,
                };
                self.manager
                    .continue_chat(&chat_id, &message, context, cancel, &on_progress)
                    .await?;
            }
            StreamJob::Inline { prompt } => {
                self.completions
                    .dispatch(&[Message::user(prompt)], cancel, &on_progress)
                    .await?;
            }
            StreamJob::Question { question, context } => {
                let messages = question_messages(&question, context.as_deref());
                self.completions
                    .dispatch(&messages, cancel, &on_progress)
                    .await?;
            }
        }
        Ok(())
    }

    async fn page_context(
        &self,
        page_content: Option<String>,
    ) -> Result<Option<Message>, SettingsError> {
        let Some(page) = page_content.filter(|page| !page.trim().is_empty()) else {
            return Ok(None);
        };
        let settings = self.settings.load().await?;
        Ok(settings
            .include_context
            .then(|| page_context_message(&page)))
    }

    fn finish(&self, subscription: &Subscription, outcome: Result<(), JobError>) {
        let outcome = match outcome {
            Ok(()) => {
                tracing::info!(request_id = %subscription.request_id(), "Streaming request finished");
                Outcome::Finished
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(request_id = %subscription.request_id(), "Streaming request cancelled");
                Outcome::Cancelled(e.to_string())
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %subscription.request_id(),
                    error = %e,
                    "Streaming request failed"
                );
                Outcome::Failed(e.to_string())
            }
        };
        subscription.emit_terminal(outcome);
    }
}

/// Owned by a spawned job. Dropping it removes the request from the
/// in-flight table and, if the job never reached `finish`, sends a
/// terminal error so the frontend is not left waiting.
struct JobGuard {
    router: Arc<RequestRouter>,
    subscription: Arc<Subscription>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let request_id = self.subscription.request_id();
        if self
            .subscription
            .emit_terminal(Outcome::Failed(JOB_ABORTED.to_string()))
        {
            tracing::error!(request_id = %request_id, "Streaming request aborted");
        }
        self.router.in_flight.close(request_id);
    }
}

fn failure(action: &str, error: &dyn std::error::Error) -> CommandReply {
    tracing::warn!(action, error = %error, "Command failed");
    CommandReply::failed(error.to_string())
}

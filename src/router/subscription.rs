//! In-flight streaming requests

use super::{EventSink, OutboundEvent, RouterError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a streaming request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Finished,
    Failed(String),
    Cancelled(String),
}

impl Outcome {
    fn into_parts(self) -> (Option<String>, bool) {
        match self {
            Outcome::Finished => (None, false),
            Outcome::Failed(message) => (Some(message), false),
            Outcome::Cancelled(message) => (Some(message), true),
        }
    }
}

/// Which event family a request streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Chat { chat_id: String },
    Inline,
    Question,
}

impl StreamKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            StreamKind::Chat { .. } => "chat",
            StreamKind::Inline => "inline",
            StreamKind::Question => "question",
        }
    }

    pub(crate) fn partial(&self, request_id: &str, content: &str) -> OutboundEvent {
        let request_id = request_id.to_string();
        let content = content.to_string();
        match self {
            StreamKind::Chat { chat_id } => OutboundEvent::PartialResponse {
                chat_id: chat_id.clone(),
                request_id,
                content,
            },
            StreamKind::Inline => OutboundEvent::InlineCompletionResponse {
                request_id,
                content: Some(content),
                error: None,
                is_done: false,
                cancelled: false,
            },
            StreamKind::Question => OutboundEvent::QuestionResponse {
                request_id,
                content: Some(content),
                error: None,
                is_done: false,
                cancelled: false,
            },
        }
    }

    pub(crate) fn terminal(&self, request_id: &str, outcome: Outcome) -> OutboundEvent {
        let request_id = request_id.to_string();
        let (error, cancelled) = outcome.into_parts();
        match self {
            StreamKind::Chat { chat_id } => OutboundEvent::ResponseComplete {
                chat_id: chat_id.clone(),
                request_id,
                error,
                cancelled,
            },
            StreamKind::Inline => OutboundEvent::InlineCompletionResponse {
                request_id,
                content: None,
                error,
                is_done: true,
                cancelled,
            },
            StreamKind::Question => OutboundEvent::QuestionResponse {
                request_id,
                content: None,
                error,
                is_done: true,
                cancelled,
            },
        }
    }
}

/// Binds one request to the frontend that started it.
///
/// Partials are delivered until the terminal event; the terminal event is
/// delivered at most once.
pub(crate) struct Subscription {
    request_id: String,
    target: String,
    kind: StreamKind,
    cancel: CancellationToken,
    terminated: AtomicBool,
    sink: Arc<dyn EventSink>,
}

impl Subscription {
    pub(crate) fn new(
        request_id: String,
        target: String,
        kind: StreamKind,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            request_id,
            target,
            kind,
            cancel: CancellationToken::new(),
            terminated: AtomicBool::new(false),
            sink,
        }
    }

    pub(crate) fn request_id(&self) -> &str {
        &self.request_id
    }

    pub(crate) fn kind(&self) -> &StreamKind {
        &self.kind
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn emit_partial(&self, content: &str) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        let event = self.kind.partial(&self.request_id, content);
        if let Err(e) = self.sink.deliver(&self.target, event) {
            tracing::debug!(
                request_id = %self.request_id,
                target_id = %self.target,
                error = %e,
                "Dropped partial event"
            );
        }
    }

    /// Deliver the terminal event. Returns false if one was already sent.
    pub(crate) fn emit_terminal(&self, outcome: Outcome) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        let event = self.kind.terminal(&self.request_id, outcome);
        if let Err(e) = self.sink.deliver(&self.target, event) {
            tracing::warn!(
                request_id = %self.request_id,
                target_id = %self.target,
                error = %e,
                "Terminal event not delivered"
            );
        }
        true
    }
}

/// Table of requests that have not yet emitted their terminal event
#[derive(Default)]
pub(crate) struct InFlight {
    entries: Mutex<HashMap<String, Arc<Subscription>>>,
}

impl InFlight {
    pub(crate) fn open(&self, subscription: Subscription) -> Result<Arc<Subscription>, RouterError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(subscription.request_id()) {
            return Err(RouterError::DuplicateRequest(subscription.request_id));
        }
        let subscription = Arc::new(subscription);
        entries.insert(subscription.request_id.clone(), subscription.clone());
        Ok(subscription)
    }

    pub(crate) fn close(&self, request_id: &str) {
        self.entries.lock().remove(request_id);
    }

    pub(crate) fn cancel(&self, request_id: &str) -> Result<(), RouterError> {
        let entries = self.entries.lock();
        let subscription = entries
            .get(request_id)
            .ok_or_else(|| RouterError::UnknownRequest(request_id.to_string()))?;
        subscription.cancel.cancel();
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

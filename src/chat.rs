//! Conversation manager
//!
//! Runs one chat turn end to end: load the transcript, add the user turn,
//! stream the assistant reply, derive a title on the first exchange and
//! commit the new transcript.

use crate::llm::{CompletionService, LlmError, Message, OnProgress};
use crate::store::{ConversationStore, DirectoryEntry, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Titles longer than this many characters are cut and get [`TITLE_ELLIPSIS`]
pub const TITLE_MAX_CHARS: usize = 30;
pub const TITLE_ELLIPSIS: &str = "...";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Title for a conversation, from its first user message
pub fn derive_title(user_text: &str) -> String {
    if user_text.chars().count() > TITLE_MAX_CHARS {
        let head: String = user_text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        user_text.to_string()
    }
}

/// One async mutex per conversation id.
///
/// Entries no longer referenced by a holder or waiter are pruned on the next
/// acquire, so the map only grows with concurrently active conversations.
#[derive(Default)]
struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct ConversationManager {
    store: ConversationStore,
    completions: Arc<dyn CompletionService>,
    locks: ConversationLocks,
}

impl ConversationManager {
    pub fn new(store: ConversationStore, completions: Arc<dyn CompletionService>) -> Self {
        Self {
            store,
            completions,
            locks: ConversationLocks::default(),
        }
    }

    /// Run one turn of conversation `id` and return the assistant's reply.
    ///
    /// `context` is sent as the first message of this call only and is never
    /// written to the transcript. Turns on the same id are serialized.
    pub async fn continue_chat(
        &self,
        id: &str,
        user_text: &str,
        context: Option<Message>,
        cancel: CancellationToken,
        on_progress: &OnProgress<'_>,
    ) -> Result<String, ChatError> {
        let _turn = self.locks.acquire(id).await;

        let mut messages = self.store.load(id).await?;
        let has_context = context.is_some();
        if let Some(context) = context {
            messages.insert(0, context);
        }
        messages.push(Message::user(user_text));

        let reply = self
            .completions
            .dispatch(&messages, cancel, on_progress)
            .await?;
        messages.push(Message::assistant(reply.clone()));

        let first_exchange_len = if has_context { 3 } else { 2 };
        let title = (messages.len() == first_exchange_len).then(|| derive_title(user_text));

        if has_context {
            messages.remove(0);
        }

        // The transcript is written only here, after the reply completed. A
        // failed dispatch above returns before this point with the user turn
        // still in `messages`, which is then dropped; nothing rolls it back.
        // Persisting the user turn any earlier requires an explicit rollback
        // on failure.
        self.store.save(id, &messages, title.as_deref()).await?;

        tracing::info!(
            chat_id = %id,
            messages = messages.len(),
            titled = title.is_some(),
            "Chat turn committed"
        );
        Ok(reply)
    }

    pub async fn history(&self, id: &str) -> Result<Vec<Message>, ChatError> {
        Ok(self.store.load(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<DirectoryEntry>, ChatError> {
        Ok(self.store.list().await?)
    }

    pub async fn rename(&self, id: &str, new_title: &str) -> Result<(), ChatError> {
        Ok(self.store.rename(id, new_title).await?)
    }

    /// Delete a conversation. Waits for an in-flight turn on the same id so
    /// the turn cannot write the transcript back afterwards.
    pub async fn delete(&self, id: &str) -> Result<(), ChatError> {
        let _turn = self.locks.acquire(id).await;
        self.store.delete(id).await?;
        tracing::info!(chat_id = %id, "Chat deleted");
        Ok(())
    }
}

//! Conversation persistence
//!
//! Each transcript is stored whole under its own key and rewritten whole on
//! every save. A single reserved key holds the chat list (id -> title) that
//! backs listing, rename and delete.

mod kv;

pub use kv::{get_json, set_json, KvStore};

use crate::llm::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Reserved key holding the chat list
pub const CHAT_LIST_KEY: &str = "chatList";

/// Title recorded for a conversation saved before any title was derived
pub const PLACEHOLDER_TITLE: &str = "Chat";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Chat not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Backend(String),
    #[error("Corrupt record under key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Chat list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(rename = "chatId")]
    pub id: String,
    pub title: String,
}

fn transcript_key(id: &str) -> String {
    format!("conversation:{id}")
}

/// Transcripts plus the chat list, over any [`KvStore`]
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KvStore>,
    /// The chat list is one document shared by every conversation, so its
    /// read-modify-write cycles are serialized here.
    directory_lock: Arc<Mutex<()>>,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            directory_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load a transcript; unknown ids yield an empty list
    pub async fn load(&self, id: &str) -> StoreResult<Vec<Message>> {
        Ok(get_json(self.kv.as_ref(), &transcript_key(id))
            .await?
            .unwrap_or_default())
    }

    /// Replace a transcript and upsert its chat list entry.
    ///
    /// The transcript is written first, then the chat list. `title: None`
    /// keeps an existing title; a conversation without an entry yet is
    /// listed as [`PLACEHOLDER_TITLE`].
    pub async fn save(&self, id: &str, messages: &[Message], title: Option<&str>) -> StoreResult<()> {
        set_json(self.kv.as_ref(), &transcript_key(id), messages).await?;
        tracing::debug!(chat_id = %id, messages = messages.len(), "Transcript stored");

        let _guard = self.directory_lock.lock().await;
        let mut entries = self.read_directory().await?;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            let Some(title) = title else {
                return Ok(());
            };
            entry.title = title.to_string();
        } else {
            entries.push(DirectoryEntry {
                id: id.to_string(),
                title: title.unwrap_or(PLACEHOLDER_TITLE).to_string(),
            });
        }
        self.write_directory(&entries).await
    }

    /// All chat list entries, in creation order
    pub async fn list(&self) -> StoreResult<Vec<DirectoryEntry>> {
        self.read_directory().await
    }

    pub async fn rename(&self, id: &str, new_title: &str) -> StoreResult<()> {
        let _guard = self.directory_lock.lock().await;
        let mut entries = self.read_directory().await?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.title = new_title.to_string();
        self.write_directory(&entries).await
    }

    /// Remove the transcript, then the chat list entry. Idempotent.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        self.kv.delete(&transcript_key(id)).await?;

        let _guard = self.directory_lock.lock().await;
        let mut entries = self.read_directory().await?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() != before {
            self.write_directory(&entries).await?;
        }
        Ok(())
    }

    async fn read_directory(&self) -> StoreResult<Vec<DirectoryEntry>> {
        Ok(get_json(self.kv.as_ref(), CHAT_LIST_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn write_directory(&self, entries: &[DirectoryEntry]) -> StoreResult<()> {
        set_json(self.kv.as_ref(), CHAT_LIST_KEY, entries).await
    }
}

//! Key-value persistence primitive
//!
//! Everything durable (transcripts, the chat list, settings) is a JSON
//! document under one key. The trait keeps the backend swappable for tests.

use super::StoreError;
use crate::db::Database;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Raw get/set/delete by key
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }
}

/// Read and deserialize a JSON document
pub async fn get_json<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match kv.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serialize and write a JSON document
pub async fn set_json<T: Serialize + Sync + ?Sized>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, raw).await
}

// ============================================================================
// Production Adapter
// ============================================================================

#[async_trait]
impl KvStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Database::get(self, key).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        Database::set(self, key, &value).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Database::delete(self, key)
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

//! User settings
//!
//! The configuration surface the settings popup edits: credential, model and
//! whether page content may be attached to chat turns. Read on every
//! dispatch so changes apply without a restart.

use crate::store::{get_json, set_json, KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Reserved key holding the settings document
pub const SETTINGS_KEY: &str = "settings";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Models the settings popup offers
pub const SUPPORTED_MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o"];

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stored settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub include_context: bool,
}

impl Settings {
    /// Configured credential, if any non-blank one is set
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Configured model, falling back to [`DEFAULT_MODEL`]
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Client-facing view that never echoes the credential
    pub fn view(&self) -> SettingsView {
        SettingsView {
            api_key_set: self.api_key().is_some(),
            api_key_hint: self.api_key().map(mask_key),
            model: self.model().to_string(),
            include_context: self.include_context,
        }
    }
}

/// Settings as returned to frontends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub api_key_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_hint: Option<String>,
    pub model: String,
    pub include_context: bool,
}

/// Partial update; absent fields keep their stored value.
/// An empty `api_key` clears the stored credential.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub include_context: Option<bool>,
}

fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

/// Settings persisted in the key-value store
#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KvStore>,
    /// Credential from the environment, used when none is stored
    fallback_api_key: Option<String>,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KvStore>, fallback_api_key: Option<String>) -> Self {
        Self {
            kv,
            fallback_api_key: fallback_api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Current settings, with the environment credential filled in when no
    /// credential is stored
    pub async fn load(&self) -> Result<Settings, SettingsError> {
        let mut settings: Settings = get_json(self.kv.as_ref(), SETTINGS_KEY)
            .await?
            .unwrap_or_default();
        if settings.api_key().is_none() {
            settings.api_key.clone_from(&self.fallback_api_key);
        }
        Ok(settings)
    }

    /// Apply a partial update and persist it
    pub async fn update(&self, update: SettingsUpdate) -> Result<Settings, SettingsError> {
        if let Some(model) = update.model.as_deref() {
            if !SUPPORTED_MODELS.contains(&model) {
                return Err(SettingsError::UnsupportedModel(model.to_string()));
            }
        }

        let mut stored: Settings = get_json(self.kv.as_ref(), SETTINGS_KEY)
            .await?
            .unwrap_or_default();
        if let Some(key) = update.api_key {
            let key = key.trim().to_string();
            stored.api_key = if key.is_empty() { None } else { Some(key) };
        }
        if let Some(model) = update.model {
            stored.model = Some(model);
        }
        if let Some(include_context) = update.include_context {
            stored.include_context = include_context;
        }

        set_json(self.kv.as_ref(), SETTINGS_KEY, &stored).await?;
        tracing::info!(
            model = %stored.model(),
            include_context = stored.include_context,
            api_key_set = stored.api_key().is_some(),
            "Settings saved"
        );
        Ok(stored)
    }
}

//! `OpenAI` chat-completions provider with streaming responses

use super::decoder::{self, StreamEvent};
use super::types::{ChatCompletionRequest, Message, OnProgress, Progress};
use super::{CompletionService, LlmError};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::pin::pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming chat-completions client.
///
/// Holds no per-request state: credential and model are read from the
/// settings store on every call, and every call owns its own accumulator.
pub struct OpenAIService {
    client: Client,
    endpoint: String,
    settings: SettingsStore,
}

impl OpenAIService {
    pub fn new(endpoint: impl Into<String>, settings: SettingsStore) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            settings,
        })
    }

    async fn resolve_credentials(&self) -> Result<(String, String), LlmError> {
        let settings = self
            .settings
            .load()
            .await
            .map_err(|e| LlmError::configuration(format!("Failed to read settings: {e}")))?;
        let api_key = settings
            .api_key()
            .ok_or_else(|| LlmError::configuration("API key for OpenAI is not set."))?
            .to_string();
        Ok((api_key, settings.model().to_string()))
    }
}

#[async_trait]
impl CompletionService for OpenAIService {
    async fn dispatch(
        &self,
        messages: &[Message],
        cancel: CancellationToken,
        on_progress: &OnProgress<'_>,
    ) -> Result<String, LlmError> {
        // Checked before anything touches the network
        let (api_key, model) = self.resolve_credentials().await?;

        let body = ChatCompletionRequest {
            model: &model,
            messages,
            stream: true,
        };
        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::cancelled()),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::network(format!("Request failed: {e}"))
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &body));
        }

        let mut events = pin!(decoder::decode(response.bytes_stream()));
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::cancelled()),
                next = events.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Delta(fragment))) => {
                    text.push_str(&fragment);
                    on_progress(Progress::Delta(&fragment));
                }
                Some(Ok(StreamEvent::Done)) | None => break,
                Some(Err(e)) => {
                    return Err(LlmError::network(format!("Stream interrupted: {e}")));
                }
            }
        }

        on_progress(Progress::Done);
        Ok(text)
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

/// Build an upstream error from a non-success response
fn upstream_error(status: StatusCode, body: &str) -> LlmError {
    let detail = serde_json::from_str::<OpenAIErrorResponse>(body)
        .map(|resp| resp.error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());

    let message = match status.as_u16() {
        401 | 403 => format!("OpenAI API request failed: authentication failed: {detail}"),
        429 => format!("OpenAI API request failed: rate limit exceeded: {detail}"),
        _ => format!("OpenAI API request failed: HTTP {status}: {detail}"),
    };
    LlmError::upstream(message).with_status(status.as_u16())
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

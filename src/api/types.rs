//! API response types

use serde::Serialize;

/// Error body for requests rejected before reaching the router
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// First event on every target stream
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    pub action: &'static str,
    pub target: String,
}

impl ReadyEvent {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            action: "ready",
            target: target.into(),
        }
    }
}

//! Wire types exchanged with frontends

use crate::llm::Message;
use crate::settings::{SettingsUpdate, SettingsView};
use crate::store::DirectoryEntry;
use serde::{Deserialize, Serialize};

/// Commands a frontend can send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    ContinueChat {
        chat_id: String,
        message: String,
        /// Explicit context message, sent ahead of the transcript
        #[serde(default)]
        context: Option<Message>,
        /// Text of the page being viewed; attached only when the
        /// `includeContext` setting is on
        #[serde(default)]
        page_content: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    GetChatHistory {
        chat_id: String,
    },
    GetChatList,
    RenameChat {
        chat_id: String,
        new_title: String,
    },
    DeleteChat {
        chat_id: String,
    },
    InlineCompletion {
        prompt: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    AskQuestionWithContext {
        question: String,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    GetSettings,
    SaveSettings(SettingsUpdate),
    CancelRequest {
        request_id: String,
    },
}

impl Command {
    /// Wire name, for logs
    pub fn action(&self) -> &'static str {
        match self {
            Command::ContinueChat { .. } => "continueChat",
            Command::GetChatHistory { .. } => "getChatHistory",
            Command::GetChatList => "getChatList",
            Command::RenameChat { .. } => "renameChat",
            Command::DeleteChat { .. } => "deleteChat",
            Command::InlineCompletion { .. } => "inlineCompletion",
            Command::AskQuestionWithContext { .. } => "askQuestionWithContext",
            Command::GetSettings => "getSettings",
            Command::SaveSettings(_) => "saveSettings",
            Command::CancelRequest { .. } => "cancelRequest",
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes fields by reference
fn is_false(value: &bool) -> bool {
    !*value
}

/// Events pushed to the frontend that started a streaming request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    PartialResponse {
        chat_id: String,
        request_id: String,
        content: String,
    },
    ResponseComplete {
        chat_id: String,
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Set when the request ended through `cancelRequest`
        #[serde(skip_serializing_if = "is_false")]
        cancelled: bool,
    },
    InlineCompletionResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        is_done: bool,
        #[serde(skip_serializing_if = "is_false")]
        cancelled: bool,
    },
    QuestionResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        is_done: bool,
        #[serde(skip_serializing_if = "is_false")]
        cancelled: bool,
    },
}

impl OutboundEvent {
    /// Wire name, used as the SSE event name
    pub fn action(&self) -> &'static str {
        match self {
            OutboundEvent::PartialResponse { .. } => "partialResponse",
            OutboundEvent::ResponseComplete { .. } => "responseComplete",
            OutboundEvent::InlineCompletionResponse { .. } => "inlineCompletionResponse",
            OutboundEvent::QuestionResponse { .. } => "questionResponse",
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn request_id(&self) -> &str {
        match self {
            OutboundEvent::PartialResponse { request_id, .. }
            | OutboundEvent::ResponseComplete { request_id, .. }
            | OutboundEvent::InlineCompletionResponse { request_id, .. }
            | OutboundEvent::QuestionResponse { request_id, .. } => request_id,
        }
    }

    /// True for the terminal event of a cancelled request
    #[allow(dead_code)] // Used in tests
    pub fn is_cancelled(&self) -> bool {
        match self {
            OutboundEvent::PartialResponse { .. } => false,
            OutboundEvent::ResponseComplete { cancelled, .. }
            | OutboundEvent::InlineCompletionResponse { cancelled, .. }
            | OutboundEvent::QuestionResponse { cancelled, .. } => *cancelled,
        }
    }

    /// True for the last event of a request
    #[allow(dead_code)] // Used in tests
    pub fn is_terminal(&self) -> bool {
        match self {
            OutboundEvent::PartialResponse { .. } => false,
            OutboundEvent::ResponseComplete { .. } => true,
            OutboundEvent::InlineCompletionResponse { is_done, .. }
            | OutboundEvent::QuestionResponse { is_done, .. } => *is_done,
        }
    }
}

/// Synchronous answer to a command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_list: Option<Vec<DirectoryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsView>,
    /// Terminal event for a streaming request that could not be started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<OutboundEvent>,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_chat_list(mut self, chat_list: Vec<DirectoryEntry>) -> Self {
        self.chat_list = Some(chat_list);
        self
    }

    pub fn with_settings(mut self, settings: SettingsView) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_event(mut self, event: OutboundEvent) -> Self {
        self.event = Some(event);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_continue_chat() {
        let command: Command = serde_json::from_value(json!({
            "action": "continueChat",
            "chatId": "c1",
            "message": "hi",
            "pageContent": "page text",
            "requestId": "r1"
        }))
        .unwrap();
        match command {
            Command::ContinueChat {
                chat_id,
                message,
                context,
                page_content,
                request_id,
            } => {
                assert_eq!(chat_id, "c1");
                assert_eq!(message, "hi");
                assert!(context.is_none());
                assert_eq!(page_content.as_deref(), Some("page text"));
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_unit_and_settings_commands() {
        let list: Command = serde_json::from_value(json!({"action": "getChatList"})).unwrap();
        assert_eq!(list.action(), "getChatList");

        let save: Command = serde_json::from_value(json!({
            "action": "saveSettings",
            "model": "gpt-4o",
            "includeContext": true
        }))
        .unwrap();
        let Command::SaveSettings(update) = save else {
            panic!("expected saveSettings");
        };
        assert_eq!(update.model.as_deref(), Some("gpt-4o"));
        assert_eq!(update.include_context, Some(true));
        assert!(update.api_key.is_none());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = serde_json::from_value::<Command>(json!({"action": "summarizePage"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_event_wire_shape() {
        let partial = OutboundEvent::PartialResponse {
            chat_id: "c1".into(),
            request_id: "r1".into(),
            content: "He".into(),
        };
        assert_eq!(
            serde_json::to_value(&partial).unwrap(),
            json!({"action": "partialResponse", "chatId": "c1", "requestId": "r1", "content": "He"})
        );

        let done = OutboundEvent::InlineCompletionResponse {
            request_id: "r2".into(),
            content: None,
            error: Some("boom".into()),
            is_done: true,
            cancelled: false,
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"action": "inlineCompletionResponse", "requestId": "r2", "error": "boom", "isDone": true})
        );
        assert!(done.is_terminal());
        assert!(!done.is_cancelled());
        assert!(!partial.is_terminal());
    }

    #[test]
    fn test_cancelled_terminal_is_marked() {
        let complete = OutboundEvent::ResponseComplete {
            chat_id: "c1".into(),
            request_id: "r1".into(),
            error: Some("Request cancelled".into()),
            cancelled: true,
        };
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({
                "action": "responseComplete",
                "chatId": "c1",
                "requestId": "r1",
                "error": "Request cancelled",
                "cancelled": true
            })
        );

        let question = OutboundEvent::QuestionResponse {
            request_id: "r2".into(),
            content: None,
            error: Some("Request cancelled".into()),
            is_done: true,
            cancelled: true,
        };
        let value = serde_json::to_value(&question).unwrap();
        assert_eq!(value["cancelled"], true);
        assert!(question.is_cancelled());

        let failed = OutboundEvent::ResponseComplete {
            chat_id: "c1".into(),
            request_id: "r3".into(),
            error: Some("boom".into()),
            cancelled: false,
        };
        let value = serde_json::to_value(&failed).unwrap();
        assert!(value.get("cancelled").is_none());
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let reply = CommandReply::ok().with_request_id("r1");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"success": true, "requestId": "r1"})
        );
    }
}

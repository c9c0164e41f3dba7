//! LLM-facing message history.
//!
//! The message-history transformer projects a ThreadProtocol log slice into
//! a sequence of [`ModelMessage`]s; model adapters translate them into each
//! provider's wire format.

use serde::{Deserialize, Serialize};

use crate::input::Attachment;
use crate::stream::Usage;

/// One message in the model-facing conversation: either a request (what we
/// send to the model) or a response (what the model sent back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ModelMessage {
    Request { parts: Vec<RequestPart> },
    Response {
        parts: Vec<ResponsePart>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RequestPart {
    SystemPrompt {
        content: String,
    },
    UserPrompt {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    ToolReturn {
        tool_name: String,
        tool_call_id: String,
        content: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Asks the model to retry after a tool failure, denial, or crash.
    RetryPrompt {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponsePart {
    Text { content: String },
    Thinking { content: String },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        args: serde_json::Value,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ModelMessage {
    pub fn request(parts: Vec<RequestPart>) -> Self {
        Self::Request { parts }
    }

    pub fn response(parts: Vec<ResponsePart>) -> Self {
        Self::Response { parts, usage: None }
    }

    pub fn user_prompt(content: impl Into<String>) -> Self {
        Self::Request {
            parts: vec![RequestPart::UserPrompt {
                content: content.into(),
                attachments: Vec::new(),
                timestamp: None,
            }],
        }
    }

    pub fn tool_return(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::Request {
            parts: vec![RequestPart::ToolReturn {
                tool_name: tool_name.into(),
                tool_call_id: tool_call_id.into(),
                content,
                timestamp: None,
            }],
        }
    }

    pub fn retry_prompt(
        content: impl Into<String>,
        tool_name: Option<String>,
        tool_call_id: Option<String>,
    ) -> Self {
        Self::Request {
            parts: vec![RequestPart::RetryPrompt {
                content: content.into(),
                tool_name,
                tool_call_id,
            }],
        }
    }

    /// All text content of a response, joined with newlines. Empty for
    /// requests.
    pub fn response_text(&self) -> String {
        match self {
            Self::Response { parts, .. } => parts
                .iter()
                .filter_map(|p| match p {
                    ResponsePart::Text { content } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Request { .. } => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_text_joins_text_parts() {
        let message = ModelMessage::response(vec![
            ResponsePart::Thinking { content: "hmm".into() },
            ResponsePart::Text { content: "one".into() },
            ResponsePart::ToolCall {
                tool_name: "echo".into(),
                tool_call_id: "c1".into(),
                args: serde_json::json!({}),
            },
            ResponsePart::Text { content: "two".into() },
        ]);
        assert_eq!(message.response_text(), "one\ntwo");
        assert_eq!(ModelMessage::user_prompt("hi").response_text(), "");
    }

    #[test]
    fn messages_round_trip() {
        let message = ModelMessage::tool_return("echo", "c1", serde_json::json!("hi"));
        let json = serde_json::to_string(&message).unwrap();
        let back: ModelMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}

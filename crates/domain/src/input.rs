//! User input types for thread execution.
//!
//! A discriminated union over the three ways a client can drive a thread:
//! a regular message, deferred-tool approval results, and scheduled
//! (trigger-driven) execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File/image attachment for multimodal user input, carried as a data URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub data_uri: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Client-supplied execution context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Working directory for file operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Model slug override (e.g. "openrouter:openai/gpt-4o"). Takes
    /// precedence over the agent's model and the environment default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A client's decision about one approval-gated tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApprovalDecision {
    /// Plain boolean approval/denial.
    Simple(bool),
    /// Detailed decision with optional override arguments or denial message.
    Detailed {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_args: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        match self {
            Self::Simple(approved) => *approved,
            Self::Detailed { approved, .. } => *approved,
        }
    }
}

/// User input driving one `/stream` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserInput {
    /// Standard user message with optional attachments.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_context: Option<ClientContext>,
    },

    /// Resume with deferred-tool results: approval decisions keyed by tool
    /// call id, plus externally-executed call results.
    DeferredTools {
        #[serde(default)]
        approvals: BTreeMap<String, ApprovalDecision>,
        #[serde(default)]
        calls: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_context: Option<ClientContext>,
    },

    /// Scheduled/triggered execution; the prompt comes from configuration,
    /// not a human.
    Scheduled {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger_context: Option<Value>,
    },
}

impl UserInput {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            attachments: Vec::new(),
            client_context: None,
        }
    }

    pub fn client_context(&self) -> Option<&ClientContext> {
        match self {
            Self::Message { client_context, .. } | Self::DeferredTools { client_context, .. } => {
                client_context.as_ref()
            }
            Self::Scheduled { .. } => None,
        }
    }
}

// ── Deferred-tool resume bundle ────────────────────────────────────

/// Resolved per-call decision fed back into the agent runner on resume.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    Approved { override_args: Option<Value> },
    Denied { message: String },
}

/// The bundle the transformer builds from a `deferred_tools` input. The
/// runner consumes it to resume exactly at the approval point: approved
/// calls execute, denied calls surface a denial message, external calls
/// inject their result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeferredToolResults {
    pub approvals: BTreeMap<String, ToolDecision>,
    pub calls: BTreeMap<String, Value>,
}

impl DeferredToolResults {
    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty() && self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_input() {
        let input: UserInput =
            serde_json::from_str(r#"{"kind":"message","content":"ping"}"#).unwrap();
        match input {
            UserInput::Message { content, attachments, .. } => {
                assert_eq!(content, "ping");
                assert!(attachments.is_empty());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn parses_deferred_tools_with_mixed_decisions() {
        let input: UserInput = serde_json::from_str(
            r#"{
                "kind": "deferred_tools",
                "approvals": {
                    "call_1": true,
                    "call_2": {"approved": false, "message": "no"}
                },
                "calls": {"call_3": {"result": 7}}
            }"#,
        )
        .unwrap();
        match input {
            UserInput::DeferredTools { approvals, calls, .. } => {
                assert!(approvals["call_1"].is_approved());
                assert!(!approvals["call_2"].is_approved());
                assert_eq!(calls["call_3"], serde_json::json!({"result": 7}));
            }
            other => panic!("expected deferred_tools, got {other:?}"),
        }
    }

    #[test]
    fn parses_scheduled_input() {
        let input: UserInput = serde_json::from_str(
            r#"{"kind":"scheduled","prompt":"daily summary","trigger_context":{"schedule_id":"s1"}}"#,
        )
        .unwrap();
        match input {
            UserInput::Scheduled { prompt, trigger_context } => {
                assert_eq!(prompt, "daily summary");
                assert!(trigger_context.is_some());
            }
            other => panic!("expected scheduled, got {other:?}"),
        }
    }

    #[test]
    fn client_model_override_surfaces() {
        let input: UserInput = serde_json::from_str(
            r#"{"kind":"message","content":"hi","client_context":{"model":"openrouter:x"}}"#,
        )
        .unwrap();
        assert_eq!(
            input.client_context().and_then(|c| c.model.as_deref()),
            Some("openrouter:x")
        );
    }
}

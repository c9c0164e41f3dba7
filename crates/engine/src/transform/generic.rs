//! The default transformer: nearly verbatim mapping from log events to
//! model messages, respecting turn and step boundaries.

use std::collections::HashSet;

use chimera_domain::event::{event_type, Event};
use chimera_domain::message::{ModelMessage, RequestPart, ResponsePart};
use chimera_domain::stream::Usage;

use super::Transformer;

/// Pass-through projection: no agent-name prefixes, no filtering, no
/// hiding. Crash recovery synthesizes a retry prompt for any tool call
/// that never resolved *and* was never parked behind an approval request
/// (approval-pending calls are resolved by the resume bundle instead).
pub struct GenericTransformer;

impl Transformer for GenericTransformer {
    fn transform(&self, events: &[Event], _agent_id: Option<&str>) -> Vec<ModelMessage> {
        generic_transform(events)
    }
}

struct Builder {
    messages: Vec<ModelMessage>,
    request_parts: Vec<RequestPart>,
    response_parts: Vec<ResponsePart>,
    usage: Option<Usage>,
    has_tool_calls: bool,
}

impl Builder {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            request_parts: Vec::new(),
            response_parts: Vec::new(),
            usage: None,
            has_tool_calls: false,
        }
    }

    fn flush_request(&mut self) {
        if !self.request_parts.is_empty() {
            self.messages.push(ModelMessage::Request {
                parts: std::mem::take(&mut self.request_parts),
            });
        }
    }

    fn flush_response(&mut self) {
        if !self.response_parts.is_empty() {
            self.messages.push(ModelMessage::Response {
                parts: std::mem::take(&mut self.response_parts),
                usage: self.usage.take(),
            });
        } else {
            self.usage = None;
        }
        self.has_tool_calls = false;
    }

    /// Text and thinking parts never share a response with tool calls:
    /// flush first when tool calls are already accumulated.
    fn flush_if_mixed(&mut self) {
        if self.has_tool_calls && !self.response_parts.is_empty() {
            self.flush_response();
        }
    }
}

pub(super) fn generic_transform(events: &[Event]) -> Vec<ModelMessage> {
    let mut b = Builder::new();
    // tool_call_id -> tool_name, insertion-ordered, for crash recovery.
    let mut pending: Vec<(String, String)> = Vec::new();
    let mut approval_requested: HashSet<String> = HashSet::new();

    for event in events {
        match event.event_type() {
            // Already processed / message lifecycle — skip.
            event_type::THREAD_BLUEPRINT
            | event_type::START
            | event_type::FINISH
            | event_type::ABORT
            | "pause"
            | "resume" => {}

            event_type::USER_TURN_START => b.request_parts.clear(),
            event_type::USER_TURN_END => b.flush_request(),

            event_type::AGENT_START => {
                b.response_parts.clear();
                b.usage = None;
                b.has_tool_calls = false;
            }
            event_type::AGENT_FINISH => b.flush_response(),

            event_type::START_STEP => b.flush_response(),
            event_type::FINISH_STEP => b.usage = event.usage(),

            event_type::USER_MESSAGE => {
                let content = event
                    .data_str("content")
                    .or_else(|| event.str_field("content"))
                    .unwrap_or("");
                b.request_parts.push(RequestPart::UserPrompt {
                    content: content.to_string(),
                    attachments: Vec::new(),
                    timestamp: event.timestamp().map(str::to_string),
                });
            }

            event_type::TEXT_COMPLETE => {
                b.flush_if_mixed();
                let content = event.str_field("content").unwrap_or("").to_string();
                b.response_parts.push(ResponsePart::Text { content });
            }

            event_type::REASONING_COMPLETE => {
                b.flush_if_mixed();
                let content = event.str_field("content").unwrap_or("").to_string();
                b.response_parts.push(ResponsePart::Thinking { content });
            }

            event_type::TOOL_INPUT_AVAILABLE => {
                // Empty ids are malformed; the model would reject them.
                let Some(id) = non_empty(event.str_field("toolCallId")) else {
                    continue;
                };
                let tool_name = event.str_field("toolName").unwrap_or("").to_string();
                b.response_parts.push(ResponsePart::ToolCall {
                    tool_name: tool_name.clone(),
                    tool_call_id: id.to_string(),
                    args: event.get("input").cloned().unwrap_or(serde_json::json!({})),
                });
                b.has_tool_calls = true;
                pending.push((id.to_string(), tool_name));
            }

            event_type::TOOL_OUTPUT_AVAILABLE => {
                let Some(id) = non_empty(event.str_field("toolCallId")) else {
                    continue;
                };
                let id = id.to_string();
                b.flush_response();
                b.messages.push(ModelMessage::Request {
                    parts: vec![RequestPart::ToolReturn {
                        tool_name: event.str_field("toolName").unwrap_or("").to_string(),
                        tool_call_id: id.clone(),
                        content: event.get("output").cloned().unwrap_or(serde_json::Value::Null),
                        timestamp: event.timestamp().map(str::to_string),
                    }],
                });
                pending.retain(|(p, _)| p != &id);
            }

            event_type::TOOL_ERROR => {
                let Some(id) = non_empty(event.str_field("toolCallId")) else {
                    continue;
                };
                let id = id.to_string();
                b.flush_response();
                b.messages.push(ModelMessage::Request {
                    parts: vec![RequestPart::RetryPrompt {
                        content: event
                            .str_field("error")
                            .unwrap_or("Tool execution failed")
                            .to_string(),
                        tool_name: event.str_field("toolName").map(str::to_string),
                        tool_call_id: Some(id.clone()),
                    }],
                });
                pending.retain(|(p, _)| p != &id);
            }

            event_type::TOOL_OUTPUT_DENIED => {
                let Some(id) = non_empty(event.str_field("toolCallId")) else {
                    continue;
                };
                let id = id.to_string();
                let tool_name = pending
                    .iter()
                    .find(|(p, _)| p == &id)
                    .map(|(_, name)| name.clone());
                b.flush_response();
                b.messages.push(ModelMessage::Request {
                    parts: vec![RequestPart::RetryPrompt {
                        content: "The user denied execution of this tool call.".into(),
                        tool_name,
                        tool_call_id: Some(id.clone()),
                    }],
                });
                pending.retain(|(p, _)| p != &id);
            }

            event_type::TOOL_APPROVAL_REQUEST => {
                if let Some(id) = non_empty(event.str_field("toolCallId")) {
                    approval_requested.insert(id.to_string());
                }
            }

            // State mutations, approval decisions and system events are
            // not part of the conversation.
            event_type::APP_MUTATION
            | event_type::TOOL_APPROVAL_RESPONSE
            | event_type::APP_USAGE
            | event_type::ERROR => {}

            // Application-custom events pass by without a projection.
            _ => {}
        }
    }

    b.flush_request();
    b.flush_response();

    // Crash recovery: a dangling tool call with no approval request means
    // the run died mid-tool. Synthesize a retry so the model is never
    // asked to continue from a hanging call.
    let mut messages = b.messages;
    for (tool_call_id, tool_name) in pending {
        if approval_requested.contains(&tool_call_id) {
            continue;
        }
        messages.push(ModelMessage::Request {
            parts: vec![RequestPart::RetryPrompt {
                content: "Tool execution failed during previous run. The tool call did not \
                          complete. Please try again or use a different approach."
                    .into(),
                tool_name: Some(tool_name),
                tool_call_id: Some(tool_call_id),
            }],
        });
    }

    messages
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

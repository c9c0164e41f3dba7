//! The ThreadProtocol / VSP event model.
//!
//! Events are open-world JSON objects discriminated by their `type` field.
//! The protocol deliberately allows application-custom `data-*` events to
//! flow through the engine untouched, so [`Event`] wraps a raw JSON object
//! and layers typed constructors and accessors on top instead of forcing
//! every event shape into a closed enum.
//!
//! Wire field names are camelCase (`toolCallId`, `threadId`); event type
//! names are kebab-case (`text-delta`, `data-agent-start`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::stream::Usage;

/// Well-known `type` values.
pub mod event_type {
    pub const THREAD_BLUEPRINT: &str = "thread-blueprint";

    pub const START: &str = "start";
    pub const FINISH: &str = "finish";
    pub const ABORT: &str = "abort";

    pub const START_STEP: &str = "start-step";
    pub const FINISH_STEP: &str = "finish-step";

    pub const TEXT_START: &str = "text-start";
    pub const TEXT_DELTA: &str = "text-delta";
    pub const TEXT_END: &str = "text-end";
    pub const TEXT_COMPLETE: &str = "text-complete";

    pub const REASONING_START: &str = "reasoning-start";
    pub const REASONING_DELTA: &str = "reasoning-delta";
    pub const REASONING_END: &str = "reasoning-end";
    pub const REASONING_COMPLETE: &str = "reasoning-complete";

    pub const TOOL_INPUT_START: &str = "tool-input-start";
    pub const TOOL_INPUT_DELTA: &str = "tool-input-delta";
    pub const TOOL_INPUT_AVAILABLE: &str = "tool-input-available";
    pub const TOOL_OUTPUT_AVAILABLE: &str = "tool-output-available";
    pub const TOOL_OUTPUT_DENIED: &str = "tool-output-denied";
    pub const TOOL_ERROR: &str = "tool-error";
    pub const TOOL_APPROVAL_REQUEST: &str = "tool-approval-request";
    pub const TOOL_APPROVAL_RESPONSE: &str = "data-tool-approval-response";

    pub const USER_TURN_START: &str = "data-user-turn-start";
    pub const USER_MESSAGE: &str = "data-user-message";
    pub const USER_TURN_END: &str = "data-user-turn-end";

    pub const AGENT_START: &str = "data-agent-start";
    pub const AGENT_FINISH: &str = "data-agent-finish";

    pub const APP_MUTATION: &str = "data-app-chimera";
    pub const APP_USAGE: &str = "chimera-app-usage";

    pub const ERROR: &str = "error";
}

/// The three delta event types. Deltas never carry `threadId` on the wire
/// and never appear in the persisted log.
pub const DELTA_TYPES: [&str; 3] = [
    event_type::TEXT_DELTA,
    event_type::REASONING_DELTA,
    event_type::TOOL_INPUT_DELTA,
];

/// A single ThreadProtocol / VSP event: a JSON object with a `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Create an event with only a `type` field.
    pub fn new(event_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".into(), Value::String(event_type.into()));
        Self { fields }
    }

    /// Parse an event from a JSON value. Fails unless the value is an
    /// object with a string `type`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => {
                let event = Self { fields };
                if event.fields.get("type").and_then(Value::as_str).is_none() {
                    return Err(Error::Protocol("event is missing a `type` field".into()));
                }
                Ok(event)
            }
            other => Err(Error::Protocol(format!(
                "event must be a JSON object, got {other}"
            ))),
        }
    }

    /// Parse an event from one JSONL line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(line)?)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".into())
    }

    /// The `type` discriminator. Empty string when absent (only possible
    /// for hand-built events).
    pub fn event_type(&self) -> &str {
        self.fields.get("type").and_then(Value::as_str).unwrap_or("")
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type() == event_type
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// The nested `data` object used by `data-*` events.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.fields.get("data").and_then(Value::as_object)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data().and_then(|d| d.get(key)).and_then(Value::as_str)
    }

    /// True for `text-delta`, `reasoning-delta` and `tool-input-delta`.
    pub fn is_delta(&self) -> bool {
        DELTA_TYPES.contains(&self.event_type())
    }

    /// Transient events are streamed to the client but never persisted.
    pub fn is_transient(&self) -> bool {
        self.bool_field("transient").unwrap_or(false)
    }

    /// Insert an ISO-8601 UTC `timestamp` unless one is already present.
    pub fn touch_timestamp(&mut self) {
        if !self.fields.contains_key("timestamp") {
            self.set("timestamp", Utc::now().to_rfc3339());
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.str_field("timestamp")
    }

    /// Usage record carried by `finish-step` events.
    pub fn usage(&self) -> Option<Usage> {
        let value = self.fields.get("usage")?;
        serde_json::from_value(value.clone()).ok()
    }
}

// ── Typed constructors ─────────────────────────────────────────────

impl Event {
    pub fn start(message_id: &str) -> Self {
        Self::new(event_type::START).with("messageId", message_id)
    }

    pub fn finish(message_id: &str) -> Self {
        Self::new(event_type::FINISH).with("messageId", message_id)
    }

    pub fn start_step() -> Self {
        Self::new(event_type::START_STEP)
    }

    pub fn finish_step(usage: Option<&Usage>) -> Self {
        let mut event = Self::new(event_type::FINISH_STEP);
        if let Some(usage) = usage {
            if let Ok(value) = serde_json::to_value(usage) {
                event.set("usage", value);
            }
        }
        event
    }

    pub fn text_start(id: &str) -> Self {
        Self::new(event_type::TEXT_START).with("id", id)
    }

    pub fn text_delta(id: &str, delta: &str) -> Self {
        Self::new(event_type::TEXT_DELTA).with("id", id).with("delta", delta)
    }

    pub fn text_end(id: &str) -> Self {
        Self::new(event_type::TEXT_END).with("id", id)
    }

    pub fn text_complete(id: &str, content: &str) -> Self {
        Self::new(event_type::TEXT_COMPLETE)
            .with("id", id)
            .with("content", content)
    }

    pub fn reasoning_start(id: &str) -> Self {
        Self::new(event_type::REASONING_START).with("id", id)
    }

    pub fn reasoning_delta(id: &str, delta: &str) -> Self {
        Self::new(event_type::REASONING_DELTA)
            .with("id", id)
            .with("delta", delta)
    }

    pub fn reasoning_end(id: &str) -> Self {
        Self::new(event_type::REASONING_END).with("id", id)
    }

    pub fn reasoning_complete(id: &str, content: &str) -> Self {
        Self::new(event_type::REASONING_COMPLETE)
            .with("id", id)
            .with("content", content)
    }

    pub fn tool_input_start(tool_call_id: &str, tool_name: &str) -> Self {
        Self::new(event_type::TOOL_INPUT_START)
            .with("toolCallId", tool_call_id)
            .with("toolName", tool_name)
    }

    pub fn tool_input_delta(tool_call_id: &str, delta: &str) -> Self {
        Self::new(event_type::TOOL_INPUT_DELTA)
            .with("toolCallId", tool_call_id)
            .with("inputTextDelta", delta)
    }

    pub fn tool_input_available(tool_call_id: &str, tool_name: &str, input: Value) -> Self {
        let mut event = Self::new(event_type::TOOL_INPUT_AVAILABLE)
            .with("toolCallId", tool_call_id)
            .with("toolName", tool_name)
            .with("input", input);
        event.touch_timestamp();
        event
    }

    pub fn tool_output_available(tool_call_id: &str, tool_name: &str, output: Value) -> Self {
        let mut event = Self::new(event_type::TOOL_OUTPUT_AVAILABLE)
            .with("toolCallId", tool_call_id)
            .with("toolName", tool_name)
            .with("output", output);
        event.touch_timestamp();
        event
    }

    pub fn tool_error(tool_call_id: &str, tool_name: &str, error: &str) -> Self {
        let mut event = Self::new(event_type::TOOL_ERROR)
            .with("toolCallId", tool_call_id)
            .with("toolName", tool_name)
            .with("error", error);
        event.touch_timestamp();
        event
    }

    pub fn tool_output_denied(tool_call_id: &str) -> Self {
        Self::new(event_type::TOOL_OUTPUT_DENIED).with("toolCallId", tool_call_id)
    }

    pub fn tool_approval_request(approval_id: &str, tool_call_id: &str) -> Self {
        Self::new(event_type::TOOL_APPROVAL_REQUEST)
            .with("approvalId", approval_id)
            .with("toolCallId", tool_call_id)
    }

    pub fn user_turn_start() -> Self {
        Self::new(event_type::USER_TURN_START)
    }

    pub fn user_message(content: &str) -> Self {
        Self::new(event_type::USER_MESSAGE)
            .with("data", serde_json::json!({ "content": content }))
    }

    pub fn user_turn_end() -> Self {
        Self::new(event_type::USER_TURN_END)
    }

    pub fn agent_start(agent_id: &str, agent_name: &str, message_id: &str) -> Self {
        Self::new(event_type::AGENT_START).with(
            "data",
            serde_json::json!({
                "agentId": agent_id,
                "agentName": agent_name,
                "messageId": message_id,
            }),
        )
    }

    pub fn agent_finish(agent_id: &str, agent_name: &str, message_id: &str) -> Self {
        Self::new(event_type::AGENT_FINISH).with(
            "data",
            serde_json::json!({
                "agentId": agent_id,
                "agentName": agent_name,
                "messageId": message_id,
            }),
        )
    }

    /// Durable state mutation. `source` identifies the emitting plugin,
    /// e.g. `widget:ContextDocs:docs-1` or `space:RosterSpace:space`.
    pub fn app_mutation(source: &str, payload: Value) -> Self {
        Self::new(event_type::APP_MUTATION).with(
            "data",
            serde_json::json!({ "source": source, "payload": payload }),
        )
    }

    /// Per-model-response usage event. Transient: streamed, never persisted.
    pub fn app_usage(message_id: &str, usage: &Usage) -> Self {
        Self::new(event_type::APP_USAGE)
            .with("messageId", message_id)
            .with("inputTokens", usage.input_tokens)
            .with("outputTokens", usage.output_tokens)
            .with("totalTokens", usage.total_tokens)
            .with("transient", true)
    }

    pub fn error(error_text: &str) -> Self {
        Self::new(event_type::ERROR).with("errorText", error_text)
    }
}

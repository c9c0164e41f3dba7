//! OpenRouter adapter (OpenAI-compatible chat completions SSE).
//!
//! OpenRouter fronts many upstream models behind the OpenAI wire format,
//! which makes it the one concrete adapter worth shipping with the
//! engine. Anything else speaking the same contract works by overriding
//! `base_url`.

use std::collections::HashMap;

use serde_json::Value;

use chimera_domain::error::{Error, Result};
use chimera_domain::message::{ModelMessage, RequestPart, ResponsePart};
use chimera_domain::stream::{BoxStream, ModelEvent, Usage};
use chimera_domain::tool::ToolDefinition;

use crate::sse::sse_response_stream;
use crate::traits::{ModelClient, ModelRequest};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_body(&self, req: &ModelRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if !req.system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": req.system_prompt}));
        }
        for message in &req.messages {
            messages.extend(message_to_openai(message));
        }

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenRouterClient {
    async fn run_stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let body = self.build_body(&req, true);
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            model = body["model"].as_str().unwrap_or("?"),
            messages = req.messages.len(),
            tools = req.tools.len(),
            "openrouter chat request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("openrouter returned {status}: {text}")));
        }

        // Tool-call deltas arrive keyed by choice index, not call id.
        let mut calls_by_index: HashMap<u64, String> = HashMap::new();
        Ok(sse_response_stream(response, move |data| {
            parse_sse_data(data, &mut calls_by_index)
        }))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ── Request serialization ──────────────────────────────────────────

fn message_to_openai(message: &ModelMessage) -> Vec<Value> {
    match message {
        ModelMessage::Request { parts } => parts.iter().map(request_part_to_openai).collect(),
        ModelMessage::Response { parts, .. } => vec![response_to_openai(parts)],
    }
}

fn request_part_to_openai(part: &RequestPart) -> Value {
    match part {
        RequestPart::SystemPrompt { content } => {
            serde_json::json!({"role": "system", "content": content})
        }
        RequestPart::UserPrompt { content, attachments, .. } => {
            if attachments.is_empty() {
                serde_json::json!({"role": "user", "content": content})
            } else {
                let mut blocks = vec![serde_json::json!({"type": "text", "text": content})];
                for attachment in attachments {
                    blocks.push(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": attachment.data_uri},
                    }));
                }
                serde_json::json!({"role": "user", "content": blocks})
            }
        }
        RequestPart::ToolReturn { tool_call_id, content, .. } => {
            let content = match content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            serde_json::json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
        }
        RequestPart::RetryPrompt { content, tool_call_id, .. } => match tool_call_id {
            Some(id) => serde_json::json!({
                "role": "tool",
                "tool_call_id": id,
                "content": format!("Error: {content}"),
            }),
            None => serde_json::json!({"role": "user", "content": content}),
        },
    }
}

fn response_to_openai(parts: &[ResponsePart]) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for part in parts {
        match part {
            ResponsePart::Text { content } => text_parts.push(content),
            ResponsePart::ToolCall { tool_name, tool_call_id, args } => {
                tool_calls.push(serde_json::json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {"name": tool_name, "arguments": args.to_string()},
                }));
            }
            // Thinking is not replayed to the provider.
            ResponsePart::Thinking { .. } => {}
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ── Stream parsing ─────────────────────────────────────────────────

fn parse_sse_data(data: &str, calls_by_index: &mut HashMap<u64, String>) -> Vec<Result<ModelEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(ModelEvent::Done { usage: Some(usage), finish_reason: None })];
        }
        return Vec::new();
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(text) = delta
        .get("reasoning")
        .or_else(|| delta.get("reasoning_content"))
        .and_then(Value::as_str)
    {
        if !text.is_empty() {
            events.push(Ok(ModelEvent::Thinking { text: text.to_string() }));
        }
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(Ok(ModelEvent::Token { text: text.to_string() }));
        }
    }

    if let Some(tool_deltas) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_deltas {
            let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(Value::as_str) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                calls_by_index.insert(index, id.to_string());
                events.push(Ok(ModelEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
            {
                if !args.is_empty() {
                    if let Some(call_id) = calls_by_index.get(&index) {
                        events.push(Ok(ModelEvent::ToolCallDelta {
                            call_id: call_id.clone(),
                            delta: args.to_string(),
                        }));
                    }
                }
            }
        }
    }

    if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
        let usage = v.get("usage").and_then(parse_usage);
        events.push(Ok(ModelEvent::Done { usage, finish_reason: Some(finish.to_string()) }));
    }

    events
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("prompt_tokens")?.as_u64()?;
    let output = v.get("completion_tokens")?.as_u64()?;
    let total = v.get("total_tokens").and_then(Value::as_u64).unwrap_or(input + output);
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: total,
        reasoning_tokens: v
            .get("completion_tokens_details")
            .and_then(|d| d.get("reasoning_tokens"))
            .and_then(Value::as_u64),
    })
}

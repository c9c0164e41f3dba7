//! Deterministic model for tests.
//!
//! [`ScriptedModel`] replays a queue of event scripts — one script per
//! model call — and records every request it receives so tests can assert
//! on the exact message history the engine produced.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use chimera_domain::error::{Error, Result};
use chimera_domain::stream::{BoxStream, ModelEvent, Usage};

use crate::registry::ModelResolver;
use crate::traits::{ModelClient, ModelRequest};

#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Vec<ModelEvent>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the event script for the next model call.
    pub fn push_script(&self, events: Vec<ModelEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// All requests received so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Convenience: a script that streams `text` in two token chunks and
    /// finishes with usage.
    pub fn text_script(text: &str) -> Vec<ModelEvent> {
        let mid = text.len() / 2;
        let mid = (0..=mid)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        let (a, b) = text.split_at(mid);
        vec![
            ModelEvent::Token { text: a.to_string() },
            ModelEvent::Token { text: b.to_string() },
            ModelEvent::Done {
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                    reasoning_tokens: None,
                }),
                finish_reason: Some("stop".into()),
            },
        ]
    }

    /// Convenience: a script that requests one tool call (streamed as
    /// started + argument deltas + finished) and then stops.
    pub fn tool_call_script(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> Vec<ModelEvent> {
        let args_json = arguments.to_string();
        let mid = args_json.len() / 2;
        vec![
            ModelEvent::ToolCallStarted {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
            },
            ModelEvent::ToolCallDelta {
                call_id: call_id.to_string(),
                delta: args_json[..mid].to_string(),
            },
            ModelEvent::ToolCallDelta {
                call_id: call_id.to_string(),
                delta: args_json[mid..].to_string(),
            },
            ModelEvent::ToolCallFinished {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
                arguments,
            },
            ModelEvent::Done { usage: None, finish_reason: Some("tool_calls".into()) },
        ]
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    async fn run_stream(&self, req: ModelRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        self.requests.lock().push(req);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Model("scripted model has no script for this call".into()))?;
        Ok(Box::pin(futures_util::stream::iter(script.into_iter().map(Ok))))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Resolver that always hands back the same scripted model.
pub struct ScriptedResolver {
    model: Arc<ScriptedModel>,
}

impl ScriptedResolver {
    pub fn new(model: Arc<ScriptedModel>) -> Arc<Self> {
        Arc::new(Self { model })
    }
}

impl ModelResolver for ScriptedResolver {
    fn resolve(&self, _model_string: Option<&str>) -> Result<Arc<dyn ModelClient>> {
        Ok(self.model.clone())
    }
}

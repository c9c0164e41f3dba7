//! Toolsets contributed by plugins.
//!
//! A toolset carries, per tool, a JSON-schema description derived at turn
//! time from current state plus an async handler. Arguments are validated
//! server-side before the handler runs; failures surface to the model as
//! `tool-error` with retry-prompt text.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use chimera_domain::error::{Error, Result};
use chimera_domain::input::ClientContext;
use chimera_domain::tool::ToolDefinition;

use crate::streaming::EventSink;

/// Runtime context handed to tool handlers. Tools emit durable mutations
/// through `sink`; they never hold references to agents or spaces.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: Uuid,
    pub sink: Arc<dyn EventSink>,
    pub client_context: Option<ClientContext>,
    /// Identifier of the agent whose turn is running.
    pub active_agent: Option<String>,
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

/// One callable tool: wire definition plus handler.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    /// Approval-gated tools pause the thread with a
    /// `tool-approval-request` instead of executing.
    pub requires_approval: bool,
    handler: ToolHandler,
}

impl Tool {
    pub async fn execute(&self, args: Value, ctx: ToolContext) -> Result<Value> {
        (self.handler)(args, ctx).await
    }
}

/// An ordered set of tools contributed by one plugin for one turn.
#[derive(Clone, Default)]
pub struct Toolset {
    tools: Vec<Tool>,
}

impl Toolset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.push(Tool {
            definition,
            requires_approval: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        });
        self
    }

    /// Register an approval-gated tool.
    pub fn tool_requiring_approval<F, Fut>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.push(Tool {
            definition,
            requires_approval: true,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

/// Flat lookup over every toolset contributed this turn.
#[derive(Clone, Default)]
pub struct MergedTools {
    by_name: HashMap<String, Tool>,
    definitions: Vec<ToolDefinition>,
}

impl MergedTools {
    pub fn merge(toolsets: &[Toolset]) -> Self {
        let mut merged = Self::default();
        for toolset in toolsets {
            for tool in toolset.tools() {
                let name = tool.definition.name.clone();
                if merged.by_name.contains_key(&name) {
                    tracing::warn!(tool = %name, "duplicate tool name; later definition ignored");
                    continue;
                }
                merged.definitions.push(tool.definition.clone());
                merged.by_name.insert(name, tool.clone());
            }
        }
        merged
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.by_name.get(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Validate `args` against the definition's JSON schema: object-ness,
/// `required` members, and per-property `enum` constraints. Deliberately
/// shallow — deep schema features belong to the model provider.
pub fn validate_args(definition: &ToolDefinition, args: &Value) -> Result<()> {
    let schema = &definition.parameters;
    let invalid = |message: String| Error::InvalidToolArgs {
        tool: definition.name.clone(),
        message,
    };

    let Some(args_obj) = args.as_object() else {
        return Err(invalid("arguments must be a JSON object".into()));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(name) {
                return Err(invalid(format!("missing required argument '{name}'")));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in args_obj {
            let Some(spec) = properties.get(name) else {
                continue;
            };
            if let Some(allowed) = spec.get("enum").and_then(Value::as_array) {
                if !allowed.contains(value) {
                    return Err(invalid(format!(
                        "'{name}' must be one of {allowed:?}, got {value}"
                    )));
                }
            }
        }
    }

    Ok(())
}

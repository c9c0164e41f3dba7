//! Graph-style space: a fixed pipeline of nodes, one node per turn.
//!
//! Each node carries its own instructions and timeout; the previous
//! node's output is substituted into the next node's template (`{output}`
//! or `{output.field}`). Nodes are stateless: history is empty, only the
//! flowing output connects them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use chimera_domain::error::{Error, Result};

use crate::agent::Agent;
use crate::plugin::{Hooks, Plugin};
use crate::space::{aggregate_plugins, Space, TurnDecision};
use crate::transform::{EmptyTransformer, Transformer};

const DEFAULT_NODE_TIMEOUT_SECS: u64 = 60;

/// One node of the pipeline.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: String,
    pub instructions: String,
    /// Agent to run this node; `None` uses the space's first agent.
    pub agent_id: Option<String>,
    pub timeout_secs: u64,
    pub label: Option<String>,
    /// Advisory output type from the blueprint. The engine treats node
    /// outputs as text and parses JSON on demand for `{output.field}`
    /// templates.
    pub output_type: Option<String>,
}

impl NodeConfig {
    fn from_value(value: &Value) -> Result<Self> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Blueprint("graph node is missing 'id'".into()))?;
        let instructions = value
            .get("instructions")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Blueprint(format!("graph node '{id}' is missing 'instructions'")))?;
        Ok(Self {
            id: id.to_string(),
            instructions: instructions.to_string(),
            agent_id: value
                .get("agent_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            timeout_secs: value
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_NODE_TIMEOUT_SECS),
            label: value.get("label").and_then(Value::as_str).map(str::to_string),
            output_type: value
                .get("output_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

pub struct GraphSpace {
    agents: Vec<Arc<Agent>>,
    widgets: Vec<Arc<dyn Plugin>>,
    nodes: Vec<NodeConfig>,
    current: RwLock<usize>,
    transformer: Arc<EmptyTransformer>,
}

impl GraphSpace {
    pub fn new(agents: Vec<Arc<Agent>>, widgets: Vec<Arc<dyn Plugin>>, config: &Value) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::Blueprint("graph space needs at least one agent".into()));
        }
        let nodes = config
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Blueprint("graph space config is missing 'nodes'".into()))?
            .iter()
            .map(NodeConfig::from_value)
            .collect::<Result<Vec<_>>>()?;
        if nodes.is_empty() {
            return Err(Error::Blueprint("graph space has no nodes".into()));
        }

        Ok(Self {
            agents,
            widgets,
            nodes,
            current: RwLock::new(0),
            transformer: Arc::new(EmptyTransformer),
        })
    }

    pub fn current_node(&self) -> &NodeConfig {
        &self.nodes[(*self.current.read()).min(self.nodes.len() - 1)]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn agent_for(&self, node: &NodeConfig) -> Result<Arc<Agent>> {
        match &node.agent_id {
            Some(agent_id) => self
                .agents
                .iter()
                .find(|a| &a.id == agent_id)
                .cloned()
                .ok_or_else(|| Error::Blueprint(format!(
                    "graph node '{}' references unknown agent '{agent_id}'",
                    node.id
                ))),
            None => Ok(self.agents[0].clone()),
        }
    }
}

/// Substitute `{output}` / `{output.field.path}` placeholders.
///
/// Field paths parse the output as JSON and walk dots. Placeholders that
/// cannot be resolved stay literal (and are logged), so a bad template is
/// visible in the next prompt rather than silently dropped.
pub fn apply_template(template: &str, output: &str) -> String {
    let mut result = String::with_capacity(template.len() + output.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('}') else {
            result.push_str(&rest[open..]);
            return result;
        };
        let path = after_open[..close].trim();

        if path == "output" {
            result.push_str(output);
        } else if let Some(field_path) = path.strip_prefix("output.") {
            match resolve_field_path(output, field_path) {
                Some(value) => result.push_str(&value),
                None => {
                    tracing::warn!(path, "unresolvable template placeholder left literal");
                    result.push('{');
                    result.push_str(path);
                    result.push('}');
                }
            }
        } else {
            // Not a template variable we know; keep it literal.
            result.push('{');
            result.push_str(&after_open[..close]);
            result.push('}');
        }

        rest = &after_open[close + 1..];
    }

    result.push_str(rest);
    result
}

fn resolve_field_path(output: &str, field_path: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(output.trim()).ok()?;
    let mut current = &parsed;
    for part in field_path.split('.') {
        current = current.get(part)?;
    }
    Some(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[async_trait::async_trait]
impl Plugin for GraphSpace {
    fn class_name(&self) -> &str {
        "GraphSpace"
    }

    fn instance_id(&self) -> &str {
        "space"
    }

    fn component_type(&self) -> &str {
        "space"
    }

    fn hooks(&self) -> Hooks {
        Hooks::NONE
    }
}

impl Space for GraphSpace {
    fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.clone()
    }

    fn active_agent(&self) -> Result<Arc<Agent>> {
        self.agent_for(self.current_node())
    }

    fn space_widgets(&self) -> Vec<Arc<dyn Plugin>> {
        self.widgets.clone()
    }

    fn transformer(&self) -> Arc<dyn Transformer> {
        self.transformer.clone()
    }

    fn plugins(self: Arc<Self>) -> Vec<Arc<dyn Plugin>> {
        let agent = self.active_agent().ok();
        let widgets = self.widgets.clone();
        aggregate_plugins(self, widgets, agent)
    }

    /// Advance to the next node, feeding `last_output` into its template;
    /// complete (and rewind for the next user input) when every node has
    /// run.
    fn should_continue_turn(&self, last_output: &str) -> TurnDecision {
        let mut current = self.current.write();
        let next = *current + 1;
        if next >= self.nodes.len() {
            *current = 0;
            return TurnDecision::Complete;
        }
        *current = next;

        let node = &self.nodes[next];
        let next_prompt = if node.instructions.contains("{output") {
            apply_template(&node.instructions, last_output)
        } else {
            format!("{}\n\nInput: {last_output}", node.instructions)
        };
        TurnDecision::Continue { next_prompt }
    }

    /// The first node prepends its instructions to the user message;
    /// later nodes receive fully-templated prompts from
    /// [`Self::should_continue_turn`].
    fn prepare_message(&self, message: &str) -> String {
        if *self.current.read() == 0 {
            format!("{}\n\n{message}", self.nodes[0].instructions)
        } else {
            message.to_string()
        }
    }

    fn turn_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.current_node().timeout_secs))
    }
}

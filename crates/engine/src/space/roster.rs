//! Roster-style multi-agent space.
//!
//! The active agent is durable state persisted as an agent-selection
//! mutation; on reload, replaying the mutations reproduces the same
//! active agent. The space contributes a `switch_agent` tool whose
//! accepted identifiers are derived at turn time to exclude the agent
//! that is currently active.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use chimera_domain::error::{Error, Result};
use chimera_domain::event::Event;
use chimera_domain::tool::ToolDefinition;

use crate::agent::Agent;
use crate::plugin::{HookContext, Hooks, Plugin, StatefulPlugin};
use crate::space::{aggregate_plugins, Space};
use crate::streaming::EventSink;
use crate::toolset::Toolset;
use crate::transform::{MultiAgentTransformer, Transformer};

/// Durable state: which agent currently holds the floor.
struct RosterState {
    active: RwLock<String>,
    identifiers: Vec<String>,
}

impl RosterState {
    fn set_active(&self, identifier: &str) -> Result<()> {
        if !self.identifiers.iter().any(|i| i == identifier) {
            return Err(Error::Plugin {
                plugin: "RosterSpace".into(),
                message: format!("no agent with identifier '{identifier}' in this roster"),
            });
        }
        *self.active.write() = identifier.to_string();
        Ok(())
    }

    fn apply(&self, payload: &Value) -> Result<()> {
        let identifier = payload
            .get("newAgentIdentifier")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Plugin {
                plugin: "RosterSpace".into(),
                message: "agent-selection mutation is missing newAgentIdentifier".into(),
            })?;
        self.set_active(identifier)
    }
}

pub struct RosterSpace {
    agents: Vec<Arc<Agent>>,
    widgets: Vec<Arc<dyn Plugin>>,
    state: Arc<RosterState>,
    transformer: Arc<MultiAgentTransformer>,
}

impl RosterSpace {
    pub fn new(
        agents: Vec<Arc<Agent>>,
        widgets: Vec<Arc<dyn Plugin>>,
        active: Option<String>,
    ) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::Blueprint("roster space needs at least one agent".into()));
        }
        let identifiers: Vec<String> = agents.iter().map(|a| a.identifier.clone()).collect();
        let active = active.unwrap_or_else(|| identifiers[0].clone());
        if !identifiers.contains(&active) {
            return Err(Error::Blueprint(format!(
                "active agent '{active}' is not in the roster"
            )));
        }

        let names: BTreeMap<String, String> = agents
            .iter()
            .map(|a| (a.identifier.clone(), a.name.clone()))
            .collect();

        Ok(Self {
            agents,
            widgets,
            state: Arc::new(RosterState { active: RwLock::new(active), identifiers }),
            transformer: Arc::new(MultiAgentTransformer::new(names)),
        })
    }

    pub fn active_identifier(&self) -> String {
        self.state.active.read().clone()
    }

    fn other_agents(&self) -> Vec<Arc<Agent>> {
        let active = self.active_identifier();
        self.agents
            .iter()
            .filter(|a| a.identifier != active)
            .cloned()
            .collect()
    }

    fn switch_agent_definition(&self, valid: &[String]) -> ToolDefinition {
        ToolDefinition::new(
            "switch_agent",
            "Switch the conversation to a different agent in the roster. Use this only \
             when the user explicitly requests an agent change or it is clearly \
             appropriate. The switch takes effect after the current turn finishes.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "identifier": {
                        "type": "string",
                        "description": "The identifier of the agent to switch to",
                        "enum": valid,
                    },
                },
                "required": ["identifier"],
            }),
        )
    }
}

#[async_trait::async_trait]
impl Plugin for RosterSpace {
    fn class_name(&self) -> &str {
        "RosterSpace"
    }

    fn instance_id(&self) -> &str {
        "space"
    }

    fn component_type(&self) -> &str {
        "space"
    }

    fn hooks(&self) -> Hooks {
        Hooks::NONE.instructions().toolset()
    }

    /// Roster of the *other* agents plus switching instructions. The
    /// current agent is self-evident and omitted.
    async fn get_instructions(&self, _ctx: &HookContext) -> Result<Option<String>> {
        let others = self.other_agents();
        if others.is_empty() {
            return Ok(None);
        }

        let roster = others
            .iter()
            .map(|a| format!("- **{}**: {}\n  {}", a.identifier, a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let identifiers = others
            .iter()
            .map(|a| a.identifier.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Some(format!(
            "# Other Agents Available\n\n{roster}\n\n## Agent Switching\n\n\
             To switch to another agent, use: switch_agent(identifier)\n\
             Available: {identifiers}"
        )))
    }

    fn get_toolset(&self, _ctx: &HookContext) -> Option<Toolset> {
        let valid: Vec<String> = self
            .other_agents()
            .iter()
            .map(|a| a.identifier.clone())
            .collect();
        if valid.is_empty() {
            // Single-agent roster: nothing to switch to.
            return None;
        }

        let definition = self.switch_agent_definition(&valid);
        let state = self.state.clone();
        let source = StatefulPlugin::mutation_source(self);
        let names: BTreeMap<String, String> = self
            .agents
            .iter()
            .map(|a| (a.identifier.clone(), a.name.clone()))
            .collect();

        Some(Toolset::new().tool(definition, move |args, ctx| {
            let state = state.clone();
            let source = source.clone();
            let names = names.clone();
            async move {
                let identifier = args
                    .get("identifier")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidToolArgs {
                        tool: "switch_agent".into(),
                        message: "missing 'identifier'".into(),
                    })?
                    .to_string();

                // Durable-mutation discipline: persist the selection
                // first, then apply it to local state.
                let payload = serde_json::json!({
                    "newAgentIdentifier": identifier,
                    "reason": "tool_call",
                    "requestedBy": state.active.read().clone(),
                });
                ctx.sink
                    .emit_protocol(Event::app_mutation(&source, payload.clone()))
                    .await?;
                state.apply(&payload)?;

                let name = names.get(&identifier).cloned().unwrap_or_else(|| identifier.clone());
                Ok(serde_json::json!(format!(
                    "Successfully switched to agent: {name} ({identifier})"
                )))
            }
        }))
    }

    fn as_stateful(&self) -> Option<&dyn StatefulPlugin> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl StatefulPlugin for RosterSpace {
    fn apply_mutation(&self, payload: &Value) -> Result<()> {
        self.state.apply(payload)
    }
}

impl Space for RosterSpace {
    fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents.clone()
    }

    fn active_agent(&self) -> Result<Arc<Agent>> {
        let active = self.active_identifier();
        self.agents
            .iter()
            .find(|a| a.identifier == active)
            .cloned()
            .ok_or_else(|| Error::Plugin {
                plugin: "RosterSpace".into(),
                message: format!("active agent '{active}' vanished from the roster"),
            })
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
}

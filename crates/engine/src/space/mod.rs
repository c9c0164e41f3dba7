//! Spaces: execution environments for agents.
//!
//! A space is both a plugin (it has lifecycle hooks) and an orchestrator:
//! it owns the agents, the space-level widgets, the transformer choice,
//! and the per-turn continuation decision. The thread driver only knows
//! this trait — never widgets, agents or concrete types.

mod generic;
mod graph;
mod roster;

pub use generic::GenericSpace;
pub use graph::{GraphSpace, NodeConfig};
pub use roster::RosterSpace;

use std::sync::Arc;
use std::time::Duration;

use chimera_domain::blueprint::{Blueprint, SpaceConfig};
use chimera_domain::error::{Error, Result};

use crate::agent::{Agent, WidgetRegistry};
use crate::plugin::Plugin;
use crate::transform::Transformer;

/// The space's answer to "should we run another turn?".
#[derive(Debug, Clone, PartialEq)]
pub enum TurnDecision {
    Complete,
    Continue { next_prompt: String },
}

/// Execution environment contract. Implementations: [`GenericSpace`],
/// [`RosterSpace`], [`GraphSpace`].
pub trait Space: Plugin {
    /// All agents, in blueprint order.
    fn agents(&self) -> Vec<Arc<Agent>>;

    /// The agent that takes the next turn.
    fn active_agent(&self) -> Result<Arc<Agent>>;

    /// Space-level widgets (shared across agents).
    fn space_widgets(&self) -> Vec<Arc<dyn Plugin>>;

    /// The transformer this space's turns use.
    fn transformer(&self) -> Arc<dyn Transformer>;

    /// All plugins that should receive lifecycle hooks, in order: the
    /// space itself, space widgets, then the active agent's widgets.
    fn plugins(self: Arc<Self>) -> Vec<Arc<dyn Plugin>>;

    /// Decide whether the thread loops for another turn. `last_output` is
    /// the text output of the turn that just finished.
    fn should_continue_turn(&self, _last_output: &str) -> TurnDecision {
        TurnDecision::Complete
    }

    /// Shape the message for the upcoming turn (e.g. graph nodes prepend
    /// their instructions).
    fn prepare_message(&self, message: &str) -> String {
        message.to_string()
    }

    /// Wall-clock bound for the upcoming turn, if this space imposes one.
    fn turn_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Shared aggregation used by every space's [`Space::plugins`] impl.
pub(crate) fn aggregate_plugins(
    space_plugin: Arc<dyn Plugin>,
    space_widgets: Vec<Arc<dyn Plugin>>,
    active_agent: Option<Arc<Agent>>,
) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    plugins.push(space_plugin);
    plugins.extend(space_widgets);
    if let Some(agent) = active_agent {
        plugins.extend(agent.widgets.iter().cloned());
    }
    plugins
}

/// Hook-filtered views over the aggregated plugin list. Pre-filtering
/// keeps no-op hooks out of the hot path.
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn all(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn user_input_handlers(&self) -> Vec<Arc<dyn Plugin>> {
        self.filtered(|h| h.user_input)
    }

    pub fn instruction_providers(&self) -> Vec<Arc<dyn Plugin>> {
        self.filtered(|h| h.instructions)
    }

    pub fn toolset_providers(&self) -> Vec<Arc<dyn Plugin>> {
        self.filtered(|h| h.toolset)
    }

    pub fn agent_output_handlers(&self) -> Vec<Arc<dyn Plugin>> {
        self.filtered(|h| h.agent_output)
    }

    fn filtered(&self, pick: impl Fn(&crate::plugin::Hooks) -> bool) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| pick(&p.hooks()))
            .cloned()
            .collect()
    }
}

/// Hydrate the space (and its agents and widgets) declared by a
/// blueprint.
///
/// A `Default` space config hydrates a [`GenericSpace`] for one agent and
/// a [`RosterSpace`] for several. `Referenced` configs are matched on the
/// trailing segment of `class_name`.
pub fn hydrate_space(blueprint: &Blueprint, registry: &WidgetRegistry) -> Result<Arc<dyn Space>> {
    blueprint.validate()?;

    let agents: Vec<Arc<Agent>> = blueprint
        .space
        .agents()
        .iter()
        .map(|config| Agent::from_config(config, registry))
        .collect::<Result<_>>()?;
    let widgets = registry.hydrate_all(blueprint.space.widgets())?;

    match &blueprint.space {
        SpaceConfig::Default { .. } => {
            if agents.len() == 1 {
                Ok(Arc::new(GenericSpace::new(sole_agent(agents)?, widgets)))
            } else {
                Ok(Arc::new(RosterSpace::new(agents, widgets, None)?))
            }
        }
        SpaceConfig::Referenced { class_name, config, .. } => {
            let short_name = class_name.rsplit('.').next().unwrap_or(class_name);
            match short_name {
                "GenericSpace" => {
                    if agents.len() != 1 {
                        return Err(Error::Blueprint(format!(
                            "GenericSpace requires exactly one agent, got {}",
                            agents.len()
                        )));
                    }
                    Ok(Arc::new(GenericSpace::new(sole_agent(agents)?, widgets)))
                }
                "RosterSpace" => {
                    let active = config
                        .get("activeAgent")
                        .or_else(|| config.get("active_agent"))
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string);
                    Ok(Arc::new(RosterSpace::new(agents, widgets, active)?))
                }
                "GraphSpace" => Ok(Arc::new(GraphSpace::new(agents, widgets, config)?)),
                other => Err(Error::Blueprint(format!("unknown space class '{other}'"))),
            }
        }
    }
}

fn sole_agent(agents: Vec<Arc<Agent>>) -> Result<Arc<Agent>> {
    agents
        .into_iter()
        .next()
        .ok_or_else(|| Error::Blueprint("blueprint must declare at least one agent".into()))
}

//! The single-agent space: one agent, pass-through history, one turn per
//! user message.

use std::sync::Arc;

use chimera_domain::error::Result;

use crate::agent::Agent;
use crate::plugin::{Hooks, Plugin};
use crate::space::{aggregate_plugins, Space};
use crate::transform::{GenericTransformer, Transformer};

pub struct GenericSpace {
    agent: Arc<Agent>,
    widgets: Vec<Arc<dyn Plugin>>,
    transformer: Arc<GenericTransformer>,
}

impl GenericSpace {
    pub fn new(agent: Arc<Agent>, widgets: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            agent,
            widgets,
            transformer: Arc::new(GenericTransformer),
        }
    }
}

#[async_trait::async_trait]
impl Plugin for GenericSpace {
    fn class_name(&self) -> &str {
        "GenericSpace"
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

impl Space for GenericSpace {
    fn agents(&self) -> Vec<Arc<Agent>> {
        vec![self.agent.clone()]
    }

    fn active_agent(&self) -> Result<Arc<Agent>> {
        Ok(self.agent.clone())
    }

    fn space_widgets(&self) -> Vec<Arc<dyn Plugin>> {
        self.widgets.clone()
    }

    fn transformer(&self) -> Arc<dyn Transformer> {
        self.transformer.clone()
    }

    fn plugins(self: Arc<Self>) -> Vec<Arc<dyn Plugin>> {
        let agent = self.agent.clone();
        let widgets = self.widgets.clone();
        aggregate_plugins(self, widgets, Some(agent))
    }
}

//! The blueprint: declarative, versioned thread configuration.
//!
//! The blueprint is always the first line of a ThreadProtocol log
//! (`type: "thread-blueprint"`) and is immutable for the life of the
//! thread. It declares the space, its agents, and all widgets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{event_type, Event};

/// ThreadProtocol version this engine reads and writes.
pub const THREAD_PROTOCOL_VERSION: &str = "0.0.7";

/// Blueprint document version.
pub const BLUEPRINT_VERSION: &str = "0.0.7";

/// Widget (or space component) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    pub class_name: String,
    pub version: String,
    pub instance_id: String,
    #[serde(default)]
    pub config: Value,
}

/// Agent configuration: either fully inline or a registry reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentConfig {
    #[serde(rename_all = "camelCase")]
    Inline {
        /// Agent id; doubles as the thread-scoped identifier unless
        /// `identifier` is set explicitly.
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identifier: Option<String>,
        #[serde(default)]
        description: String,
        base_prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_string: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        widgets: Vec<ComponentConfig>,
        #[serde(default)]
        metadata: Value,
    },
    #[serde(rename_all = "camelCase")]
    Referenced {
        uuid: Uuid,
        version: String,
        #[serde(default)]
        overrides: Value,
    },
}

impl AgentConfig {
    /// The thread-scoped identifier this config resolves to.
    pub fn identifier(&self) -> String {
        match self {
            Self::Inline { id, identifier, .. } => {
                identifier.clone().unwrap_or_else(|| id.clone())
            }
            Self::Referenced { uuid, .. } => uuid.to_string(),
        }
    }
}

/// Space configuration. Both variants carry the ordered agent list and the
/// space-level widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpaceConfig {
    #[serde(rename_all = "camelCase")]
    Default {
        agents: Vec<AgentConfig>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        widgets: Vec<ComponentConfig>,
    },
    #[serde(rename_all = "camelCase")]
    Referenced {
        class_name: String,
        version: String,
        #[serde(default)]
        config: Value,
        agents: Vec<AgentConfig>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        widgets: Vec<ComponentConfig>,
    },
}

impl SpaceConfig {
    pub fn agents(&self) -> &[AgentConfig] {
        match self {
            Self::Default { agents, .. } | Self::Referenced { agents, .. } => agents,
        }
    }

    pub fn widgets(&self) -> &[ComponentConfig] {
        match self {
            Self::Default { widgets, .. } | Self::Referenced { widgets, .. } => widgets,
        }
    }
}

/// The parsed blueprint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub thread_id: Uuid,
    pub blueprint_version: String,
    pub thread_protocol_version: String,
    pub space: SpaceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
}

impl Blueprint {
    pub fn new(thread_id: Uuid, space: SpaceConfig) -> Self {
        Self {
            thread_id,
            blueprint_version: BLUEPRINT_VERSION.into(),
            thread_protocol_version: THREAD_PROTOCOL_VERSION.into(),
            space,
            max_turns: None,
            max_depth: None,
        }
    }

    /// Structural invariants: at least one agent, unique agent identifiers,
    /// unique widget instance ids across the whole blueprint.
    pub fn validate(&self) -> Result<()> {
        let agents = self.space.agents();
        if agents.is_empty() {
            return Err(Error::Blueprint("blueprint must declare at least one agent".into()));
        }

        let mut identifiers = std::collections::HashSet::new();
        for agent in agents {
            let identifier = agent.identifier();
            if !identifiers.insert(identifier.clone()) {
                return Err(Error::Blueprint(format!(
                    "duplicate agent identifier '{identifier}'"
                )));
            }
        }

        let mut instance_ids = std::collections::HashSet::new();
        let agent_widgets = agents.iter().flat_map(|a| match a {
            AgentConfig::Inline { widgets, .. } => widgets.as_slice(),
            AgentConfig::Referenced { .. } => &[],
        });
        for widget in self.space.widgets().iter().chain(agent_widgets) {
            if !instance_ids.insert(widget.instance_id.clone()) {
                return Err(Error::Blueprint(format!(
                    "duplicate widget instance_id '{}'",
                    widget.instance_id
                )));
            }
        }

        Ok(())
    }

    /// Build the `thread-blueprint` event (line 1 of the log).
    pub fn to_event(&self) -> Event {
        let document = serde_json::json!({
            "space": self.space,
            "maxTurns": self.max_turns,
            "maxDepth": self.max_depth,
        });
        let mut event = Event::new(event_type::THREAD_BLUEPRINT)
            .with("threadId", self.thread_id.to_string())
            .with("blueprintVersion", self.blueprint_version.clone())
            .with("threadProtocolVersion", self.thread_protocol_version.clone())
            .with("blueprint", document);
        event.touch_timestamp();
        event
    }

    /// Parse a `thread-blueprint` event.
    pub fn from_event(event: &Event) -> Result<Self> {
        if !event.is(event_type::THREAD_BLUEPRINT) {
            return Err(Error::Blueprint(format!(
                "first event must be thread-blueprint, got '{}'",
                event.event_type()
            )));
        }

        let thread_id = event
            .str_field("threadId")
            .ok_or_else(|| Error::Blueprint("thread-blueprint is missing threadId".into()))?;
        let thread_id = Uuid::parse_str(thread_id)
            .map_err(|e| Error::Blueprint(format!("invalid threadId: {e}")))?;

        let document = event
            .get("blueprint")
            .ok_or_else(|| Error::Blueprint("thread-blueprint is missing blueprint document".into()))?;
        let space: SpaceConfig = serde_json::from_value(
            document
                .get("space")
                .cloned()
                .ok_or_else(|| Error::Blueprint("blueprint document is missing space".into()))?,
        )
        .map_err(|e| Error::Blueprint(format!("invalid space config: {e}")))?;

        let max_turns = document
            .get("maxTurns")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        let max_depth = document
            .get("maxDepth")
            .and_then(Value::as_u64)
            .map(|v| v as u32);

        let blueprint = Self {
            thread_id,
            blueprint_version: event
                .str_field("blueprintVersion")
                .unwrap_or(BLUEPRINT_VERSION)
                .to_string(),
            thread_protocol_version: event
                .str_field("threadProtocolVersion")
                .unwrap_or("0.0.1")
                .to_string(),
            space,
            max_turns,
            max_depth,
        };
        blueprint.validate()?;
        Ok(blueprint)
    }
}

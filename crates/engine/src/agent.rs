//! Agents and widget hydration.
//!
//! An [`Agent`] is hydrated from its blueprint config and owns its
//! private widgets. The agent's `base_prompt` is the sole system prompt;
//! everything dynamic rides in the user message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use chimera_domain::blueprint::{AgentConfig, ComponentConfig};
use chimera_domain::error::{Error, Result};

use crate::plugin::Plugin;

/// Constructor for one widget class, keyed by `class_name`.
pub type WidgetFactory = Arc<dyn Fn(&ComponentConfig) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Maps blueprint `class_name`s to widget constructors. The host
/// application registers its widget catalog here before hydrating spaces.
#[derive(Clone, Default)]
pub struct WidgetRegistry {
    factories: HashMap<String, WidgetFactory>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: &str, factory: F)
    where
        F: Fn(&ComponentConfig) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.to_string(), Arc::new(factory));
    }

    pub fn hydrate(&self, config: &ComponentConfig) -> Result<Arc<dyn Plugin>> {
        let factory = self.factories.get(&config.class_name).ok_or_else(|| {
            Error::Blueprint(format!(
                "unknown widget class '{}' (instance '{}')",
                config.class_name, config.instance_id
            ))
        })?;
        factory(config)
    }

    pub fn hydrate_all(&self, configs: &[ComponentConfig]) -> Result<Vec<Arc<dyn Plugin>>> {
        configs.iter().map(|c| self.hydrate(c)).collect()
    }
}

/// A hydrated agent: configuration plus resolved widgets.
pub struct Agent {
    pub id: String,
    pub name: String,
    /// Thread-scoped identifier (defaults to `id`).
    pub identifier: String,
    pub description: String,
    pub base_prompt: String,
    pub model_string: Option<String>,
    pub widgets: Vec<Arc<dyn Plugin>>,
    pub metadata: Value,
}

impl Agent {
    pub fn from_config(config: &AgentConfig, registry: &WidgetRegistry) -> Result<Arc<Agent>> {
        match config {
            AgentConfig::Inline {
                id,
                name,
                identifier,
                description,
                base_prompt,
                model_string,
                widgets,
                metadata,
            } => Ok(Arc::new(Agent {
                id: id.clone(),
                name: name.clone(),
                identifier: identifier.clone().unwrap_or_else(|| id.clone()),
                description: description.clone(),
                base_prompt: base_prompt.clone(),
                model_string: model_string.clone(),
                widgets: registry.hydrate_all(widgets)?,
                metadata: metadata.clone(),
            })),
            AgentConfig::Referenced { uuid, .. } => Err(Error::Blueprint(format!(
                "referenced agent {uuid} requires an agent registry, which this deployment does not provide"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Hooks;

    struct NullWidget {
        instance_id: String,
    }

    #[async_trait::async_trait]
    impl Plugin for NullWidget {
        fn class_name(&self) -> &str {
            "NullWidget"
        }
        fn instance_id(&self) -> &str {
            &self.instance_id
        }
        fn hooks(&self) -> Hooks {
            Hooks::NONE
        }
    }

    fn registry() -> WidgetRegistry {
        let mut registry = WidgetRegistry::new();
        registry.register("NullWidget", |config| {
            Ok(Arc::new(NullWidget { instance_id: config.instance_id.clone() }) as Arc<dyn Plugin>)
        });
        registry
    }

    #[test]
    fn hydrates_inline_agent_with_widgets() {
        let config = AgentConfig::Inline {
            id: "helper".into(),
            name: "Helper".into(),
            identifier: None,
            description: String::new(),
            base_prompt: "You are helpful.".into(),
            model_string: Some("openrouter:openai/gpt-4o".into()),
            widgets: vec![ComponentConfig {
                class_name: "NullWidget".into(),
                version: "1.0.0".into(),
                instance_id: "n-1".into(),
                config: serde_json::json!({}),
            }],
            metadata: Value::Null,
        };

        let agent = Agent::from_config(&config, &registry()).unwrap();
        assert_eq!(agent.identifier, "helper");
        assert_eq!(agent.widgets.len(), 1);
        assert_eq!(agent.widgets[0].instance_id(), "n-1");
    }

    #[test]
    fn unknown_widget_class_fails_hydration() {
        let config = AgentConfig::Inline {
            id: "helper".into(),
            name: "Helper".into(),
            identifier: None,
            description: String::new(),
            base_prompt: "p".into(),
            model_string: None,
            widgets: vec![ComponentConfig {
                class_name: "Mystery".into(),
                version: "1.0.0".into(),
                instance_id: "m-1".into(),
                config: serde_json::json!({}),
            }],
            metadata: Value::Null,
        };
        assert!(Agent::from_config(&config, &WidgetRegistry::new()).is_err());
    }

    #[test]
    fn referenced_agents_are_rejected() {
        let config = AgentConfig::Referenced {
            uuid: uuid::Uuid::new_v4(),
            version: "1".into(),
            overrides: Value::Null,
        };
        assert!(Agent::from_config(&config, &WidgetRegistry::new()).is_err());
    }
}

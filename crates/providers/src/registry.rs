//! Model-string resolution.
//!
//! Model strings take the form `provider:model` (e.g.
//! `openrouter:openai/gpt-4o`); a bare id defaults to OpenRouter. The
//! engine resolves per turn with the precedence: client-context override,
//! agent `model_string`, environment default.

use std::sync::Arc;

use chimera_domain::error::{Error, Result};

use crate::openrouter::OpenRouterClient;
use crate::traits::ModelClient;

/// Resolves model strings to concrete clients. The gateway holds one of
/// these; tests substitute a scripted resolver.
pub trait ModelResolver: Send + Sync {
    /// Resolve a model string, or the configured default when `None`.
    fn resolve(&self, model_string: Option<&str>) -> Result<Arc<dyn ModelClient>>;
}

/// Environment-backed registry.
pub struct ModelRegistry {
    api_key: Option<String>,
    default_model: String,
}

impl ModelRegistry {
    pub fn new(api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self { api_key, default_model: default_model.into() }
    }

    /// Read `OPENROUTER_API_KEY` from the environment.
    pub fn from_env(default_model: impl Into<String>) -> Self {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(api_key, default_model)
    }
}

impl ModelResolver for ModelRegistry {
    fn resolve(&self, model_string: Option<&str>) -> Result<Arc<dyn ModelClient>> {
        let model_string = model_string.unwrap_or(&self.default_model);

        let (provider, model) = match model_string.split_once(':') {
            Some((provider, model)) => (provider, model),
            None => ("openrouter", model_string),
        };

        match provider {
            "openrouter" => {
                let api_key = self.api_key.clone().ok_or_else(|| {
                    Error::Model("OPENROUTER_API_KEY is not set; cannot reach the model".into())
                })?;
                Ok(Arc::new(OpenRouterClient::new(api_key, model)?))
            }
            other => Err(Error::Model(format!(
                "unknown model provider '{other}' in '{model_string}'"
            ))),
        }
    }
}

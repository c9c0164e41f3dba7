//! Server configuration, read from the environment.
//!
//! Chimera is configured entirely through environment variables (there is
//! no config-file surface):
//!
//! - `CHIMERA_HOST` / `CHIMERA_PORT` — bind address (default `127.0.0.1:8000`)
//! - `DEFAULT_MODEL_STRING` — fallback model identifier
//! - `CHIMERA_VERBOSE_SSE` — log every emitted event in full
//! - `CHIMERA_THREADS_DIR` — optional server-side log directory; unset means
//!   streaming-only (the client owns persistence)
//! - `OPENROUTER_API_KEY` — provider credential (consumed by the providers crate)

use std::path::PathBuf;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub default_model: String,
    pub verbose_sse: bool,
    /// When set, the gateway also persists each thread's condensed log under
    /// `<threads_dir>/<thread_id>.jsonl`.
    pub threads_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            default_model: "openai/gpt-4o".into(),
            verbose_sse: false,
            threads_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CHIMERA_HOST").unwrap_or(defaults.host),
            port: std::env::var("CHIMERA_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            default_model: std::env::var("DEFAULT_MODEL_STRING").unwrap_or(defaults.default_model),
            verbose_sse: env_truthy("CHIMERA_VERBOSE_SSE"),
            threads_dir: std::env::var("CHIMERA_THREADS_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

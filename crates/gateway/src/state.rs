use std::sync::Arc;

use chimera_domain::config::Config;
use chimera_engine::agent::WidgetRegistry;
use chimera_protocol::store::ThreadStore;
use chimera_providers::ModelResolver;

use crate::registry::ActiveTaskRegistry;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Resolves model strings to concrete clients.
    pub resolver: Arc<dyn ModelResolver>,
    /// Widget catalog for blueprint hydration. Empty by default; hosts
    /// embedding the gateway register their widget classes here.
    pub widgets: Arc<WidgetRegistry>,
    /// Running threads, for `/halt`.
    pub registry: Arc<ActiveTaskRegistry>,
    /// Server-side log storage; `None` means streaming-only (the client
    /// owns persistence).
    pub threads: Option<Arc<ThreadStore>>,
}

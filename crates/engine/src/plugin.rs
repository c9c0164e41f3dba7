//! The plugin framework.
//!
//! Widgets and spaces are both plugins: they declare which of the four
//! lifecycle hooks they implement and the dispatcher only calls those.
//! Stateful plugins change state exclusively through durable mutations —
//! persist first, then apply — so that live state and replayed state are
//! provably identical.

use std::sync::Arc;

use serde_json::Value;

use chimera_domain::error::Result;
use chimera_domain::event::{event_type, Event};
use chimera_domain::input::ClientContext;
use chimera_domain::trace::TraceEvent;

use crate::runner::TurnOutcome;
use crate::state::ThreadState;
use crate::streaming::EventSink;
use crate::toolset::Toolset;

/// Capability flags: which hooks a plugin actually implements.
/// Dispatch skips plugins whose flag is off, so no-op hooks never run in
/// hot paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub user_input: bool,
    pub instructions: bool,
    pub toolset: bool,
    pub agent_output: bool,
}

impl Hooks {
    pub const NONE: Hooks = Hooks {
        user_input: false,
        instructions: false,
        toolset: false,
        agent_output: false,
    };

    pub fn user_input(mut self) -> Self {
        self.user_input = true;
        self
    }

    pub fn instructions(mut self) -> Self {
        self.instructions = true;
        self
    }

    pub fn toolset(mut self) -> Self {
        self.toolset = true;
        self
    }

    pub fn agent_output(mut self) -> Self {
        self.agent_output = true;
        self
    }
}

/// A durable state change, ready to persist as `data-app-chimera`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub source: String,
    pub payload: Value,
}

/// Control-flow result returned from lifecycle hooks.
pub enum HookResult {
    /// Proceed normally.
    Continue,
    /// Proceed, persisting and applying these mutations first.
    ContinueWith(Vec<Mutation>),
    /// Substitute this value for the default (e.g. replace the user
    /// message).
    Override(Value),
    /// Apply a function to the default value.
    Transform(Arc<dyn Fn(Value) -> Value + Send + Sync>),
    /// Cancel this action but keep the thread alive.
    Block { reason: String },
    /// Terminate the thread.
    Halt { reason: String },
    /// Pause until an external signal resumes the thread.
    AwaitHuman { prompt: String },
}

impl std::fmt::Debug for HookResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "Continue"),
            Self::ContinueWith(m) => write!(f, "ContinueWith({} mutations)", m.len()),
            Self::Override(v) => write!(f, "Override({v})"),
            Self::Transform(_) => write!(f, "Transform(..)"),
            Self::Block { reason } => write!(f, "Block({reason})"),
            Self::Halt { reason } => write!(f, "Halt({reason})"),
            Self::AwaitHuman { prompt } => write!(f, "AwaitHuman({prompt})"),
        }
    }
}

/// Context handed to every hook: read-only thread state plus the event
/// seam. Plugins observe through `state` and speak through `sink`.
#[derive(Clone)]
pub struct HookContext {
    pub state: Arc<ThreadState>,
    pub sink: Arc<dyn EventSink>,
    pub client_context: Option<ClientContext>,
}

/// The uniform widget/space interface.
///
/// All hook defaults are no-ops; implementations override the ones they
/// need and advertise them via [`Plugin::hooks`].
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn class_name(&self) -> &str;

    fn instance_id(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// `"widget"` or `"space"`; used for mutation source routing.
    fn component_type(&self) -> &str {
        "widget"
    }

    fn hooks(&self) -> Hooks {
        Hooks::NONE
    }

    /// Called before the first turn for a user message.
    async fn on_user_input(&self, _message: &str, _ctx: &HookContext) -> Result<Option<HookResult>> {
        Ok(None)
    }

    /// Dynamic instructions appended to the user message each turn.
    async fn get_instructions(&self, _ctx: &HookContext) -> Result<Option<String>> {
        Ok(None)
    }

    /// Tools contributed for this turn. Definitions may depend on current
    /// state, so this runs every turn.
    fn get_toolset(&self, _ctx: &HookContext) -> Option<Toolset> {
        None
    }

    /// Called after each agent turn.
    async fn on_agent_output(
        &self,
        _outcome: &TurnOutcome,
        _ctx: &HookContext,
    ) -> Result<Option<HookResult>> {
        Ok(None)
    }

    /// Stateful plugins return themselves here so the replay sweep can
    /// find them without downcasting.
    fn as_stateful(&self) -> Option<&dyn StatefulPlugin> {
        None
    }
}

/// A plugin whose state is reconstructed by replaying its own mutation
/// events from the log.
///
/// The contract: never mutate in-memory state directly. Build a mutation
/// payload, [`mutate`](Self::mutate) it (persist first, apply second), and
/// implement [`apply_mutation`](Self::apply_mutation) as the only code
/// path that touches state. Thread startup replays every matching
/// mutation through `apply_mutation` before the first turn.
#[async_trait::async_trait]
pub trait StatefulPlugin: Plugin {
    /// Apply one mutation payload to local state. Must be deterministic.
    fn apply_mutation(&self, payload: &Value) -> Result<()>;

    /// The `data.source` string identifying this instance, e.g.
    /// `widget:ContextDocs:docs-1` or `space:RosterSpace:space`.
    fn mutation_source(&self) -> String {
        format!(
            "{}:{}:{}",
            self.component_type(),
            self.class_name(),
            self.instance_id()
        )
    }

    /// Persist `payload` to the log, then apply it locally — in that
    /// order, always.
    async fn mutate(&self, sink: &dyn EventSink, payload: Value) -> Result<()> {
        let event = Event::app_mutation(&self.mutation_source(), payload.clone());
        sink.emit_protocol(event).await?;
        self.apply_mutation(&payload)
    }
}

/// Replay every `data-app-chimera` mutation in `events` through its
/// owning plugin, in log order. Called once at thread reconstruction,
/// before the first turn.
pub fn replay_mutations(plugins: &[Arc<dyn Plugin>], events: &[Event]) -> Result<()> {
    for event in events {
        if !event.is(event_type::APP_MUTATION) {
            continue;
        }
        let Some(source) = event.data_str("source") else {
            tracing::warn!("mutation event without data.source; skipped");
            continue;
        };
        let Some(payload) = event.data().and_then(|d| d.get("payload")) else {
            continue;
        };

        let mut matched = false;
        for plugin in plugins {
            if let Some(stateful) = plugin.as_stateful() {
                if stateful.mutation_source() == source {
                    stateful.apply_mutation(payload)?;
                    TraceEvent::MutationApplied { source: source.to_string() }.emit();
                    matched = true;
                    break;
                }
            }
        }
        if !matched {
            tracing::warn!(source, "mutation has no matching plugin instance");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::CollectingSink;
    use parking_lot::RwLock;

    struct Counter {
        count: RwLock<i64>,
    }

    #[async_trait::async_trait]
    impl Plugin for Counter {
        fn class_name(&self) -> &str {
            "Counter"
        }
        fn instance_id(&self) -> &str {
            "c-1"
        }
        fn as_stateful(&self) -> Option<&dyn StatefulPlugin> {
            Some(self)
        }
    }

    #[async_trait::async_trait]
    impl StatefulPlugin for Counter {
        fn apply_mutation(&self, payload: &Value) -> Result<()> {
            let delta = payload.get("delta").and_then(Value::as_i64).unwrap_or(0);
            *self.count.write() += delta;
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutate_persists_then_applies() {
        let sink = CollectingSink::new();
        let counter = Counter { count: RwLock::new(0) };

        counter
            .mutate(&sink, serde_json::json!({"delta": 2}))
            .await
            .unwrap();
        assert_eq!(*counter.count.read(), 2);

        let persisted = sink.protocol_events();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].event_type(), "data-app-chimera");
        assert_eq!(persisted[0].data_str("source"), Some("widget:Counter:c-1"));
    }

    #[tokio::test]
    async fn replay_reconstructs_state() {
        let sink = CollectingSink::new();
        let live = Counter { count: RwLock::new(0) };
        live.mutate(&sink, serde_json::json!({"delta": 2})).await.unwrap();
        live.mutate(&sink, serde_json::json!({"delta": 3})).await.unwrap();

        // Fresh instance + replay == live state.
        let fresh = Arc::new(Counter { count: RwLock::new(0) });
        let as_plugin: Arc<dyn Plugin> = fresh.clone();
        replay_mutations(&[as_plugin], &sink.protocol_events()).unwrap();
        assert_eq!(*fresh.count.read(), *live.count.read());
    }

    #[test]
    fn mutation_source_format() {
        let counter = Counter { count: RwLock::new(0) };
        assert_eq!(StatefulPlugin::mutation_source(&counter), "widget:Counter:c-1");
    }
}

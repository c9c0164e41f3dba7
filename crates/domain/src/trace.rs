use serde::Serialize;

/// Structured trace events emitted across all Chimera crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ThreadStarted {
        thread_id: String,
        agent_count: usize,
        history_events: usize,
    },
    TurnCompleted {
        thread_id: String,
        turn: u32,
        agent_id: String,
        deferred: bool,
    },
    ThreadFinished {
        thread_id: String,
        turns: u32,
    },
    ModelRequest {
        model: String,
        duration_ms: u64,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    },
    ToolDispatched {
        tool_name: String,
        duration_ms: u64,
        is_error: bool,
    },
    MutationApplied {
        source: String,
    },
    LogOpened {
        path: String,
    },
    TaskCancelled {
        thread_id: String,
    },
    StreamClosed {
        thread_id: String,
        events_sent: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "chimera_event");
    }
}

//! Shared thread state.
//!
//! [`SharedThreadLog`] is the live, in-memory view of the condensed log:
//! seeded with the request's history and extended as the turn emits
//! protocol events, so each turn's transformer sees every prior turn —
//! including ones from the same request. The durable writer keeps its own
//! condenser; both run the same deterministic state machine.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use chimera_domain::blueprint::Blueprint;
use chimera_domain::event::{event_type, Event};
use chimera_domain::stream::Usage;
use chimera_protocol::condense::EventCondenser;

/// In-memory condensed event log for one running thread.
#[derive(Default)]
pub struct SharedThreadLog {
    condenser: Mutex<EventCondenser>,
    events: RwLock<Vec<Event>>,
    usage: RwLock<Usage>,
}

impl SharedThreadLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with already-condensed history (the events a client sent,
    /// blueprint excluded).
    pub fn seeded(history: Vec<Event>) -> Self {
        let log = Self::new();
        {
            let mut usage = log.usage.write();
            for event in &history {
                if event.is(event_type::FINISH_STEP) {
                    if let Some(u) = event.usage() {
                        usage.accumulate(&u);
                    }
                }
            }
        }
        *log.events.write() = history;
        log
    }

    /// Feed one streaming event through the condenser, appending the
    /// condensed result (if any) to the live view.
    pub fn ingest(&self, event: Event) {
        let condensed = self.condenser.lock().process(event);
        if let Some(condensed) = condensed {
            if condensed.is(event_type::FINISH_STEP) {
                if let Some(u) = condensed.usage() {
                    self.usage.write().accumulate(&u);
                }
            }
            self.events.write().push(condensed);
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn usage(&self) -> Usage {
        self.usage.read().clone()
    }
}

/// Read-only view of a running thread, passed to hooks, transformers and
/// the runner. Plugins observe state through this; they never own it.
pub struct ThreadState {
    pub thread_id: Uuid,
    pub parent_thread_id: Option<Uuid>,
    pub depth: u32,
    pub max_turns: Option<u32>,
    pub max_depth: Option<u32>,
    pub created_at: Option<String>,
    log: Arc<SharedThreadLog>,
}

impl ThreadState {
    pub fn new(blueprint: &Blueprint, log: Arc<SharedThreadLog>) -> Self {
        Self {
            thread_id: blueprint.thread_id,
            parent_thread_id: None,
            depth: 0,
            max_turns: blueprint.max_turns,
            max_depth: blueprint.max_depth,
            created_at: None,
            log,
        }
    }

    /// All condensed events so far (blueprint excluded).
    pub fn events(&self) -> Vec<Event> {
        self.log.snapshot()
    }

    pub fn log(&self) -> &Arc<SharedThreadLog> {
        &self.log
    }

    /// Number of agent turns recorded so far.
    pub fn turn_number(&self) -> u32 {
        self.log
            .snapshot()
            .iter()
            .filter(|e| e.is(event_type::AGENT_START))
            .count() as u32
    }

    /// Aggregated token usage across all steps.
    pub fn usage(&self) -> Usage {
        self.log.usage()
    }
}

//! Delta condensation.
//!
//! ThreadProtocol IS condensed VSP: the only difference between the wire
//! stream and the log is that delta families collapse into a single
//! `*-complete` event. Everything else passes through unchanged.

use std::collections::HashMap;

use chimera_domain::event::{event_type, Event};

/// Accumulator for one in-flight delta family, keyed by its part id
/// (text/reasoning) or tool call id.
#[derive(Debug)]
enum Accumulator {
    Text(String),
    Reasoning(String),
    ToolInput { tool_name: String, args: String },
}

/// Per-connection state machine that consumes streaming VSP events and
/// yields the condensed events that belong in the log.
///
/// Returns `Some(event)` when the input event (or the family it closes) is
/// ready for JSONL, `None` while a family is still accumulating or when
/// the event is dropped (message-scope brackets).
#[derive(Debug, Default)]
pub struct EventCondenser {
    accumulators: HashMap<String, Accumulator>,
}

impl EventCondenser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all partial state (e.g. between messages). Families that
    /// were started but never closed are dropped without emitting a
    /// `*-complete` event.
    pub fn reset(&mut self) {
        if !self.accumulators.is_empty() {
            tracing::debug!(
                dropped = self.accumulators.len(),
                "condenser reset with partial accumulators"
            );
        }
        self.accumulators.clear();
    }

    pub fn process(&mut self, event: Event) -> Option<Event> {
        match event.event_type() {
            // Message-scope brackets are not persisted.
            event_type::START | event_type::FINISH | event_type::ABORT => None,

            event_type::TEXT_START => {
                self.open(&event, "id", |_| Accumulator::Text(String::new()));
                None
            }
            event_type::TEXT_DELTA => {
                self.append(&event, "id", "delta");
                None
            }
            event_type::TEXT_END => self.close(&event, "id", |id, acc| match acc {
                Accumulator::Text(content) => Some(Event::text_complete(id, &content)),
                _ => None,
            }),

            event_type::REASONING_START => {
                self.open(&event, "id", |_| Accumulator::Reasoning(String::new()));
                None
            }
            event_type::REASONING_DELTA => {
                self.append(&event, "id", "delta");
                None
            }
            event_type::REASONING_END => self.close(&event, "id", |id, acc| match acc {
                Accumulator::Reasoning(content) => Some(Event::reasoning_complete(id, &content)),
                _ => None,
            }),

            event_type::TOOL_INPUT_START => {
                let tool_name = event.str_field("toolName").unwrap_or("").to_string();
                self.open(&event, "toolCallId", move |_| Accumulator::ToolInput {
                    tool_name,
                    args: String::new(),
                });
                None
            }
            event_type::TOOL_INPUT_DELTA => {
                self.append(&event, "toolCallId", "inputTextDelta");
                None
            }
            event_type::TOOL_INPUT_AVAILABLE => {
                // The terminal event for a tool-input family. If the event
                // already carries its assembled `input`, pass it through;
                // otherwise parse the accumulated argument JSON.
                let mut event = event;
                let key = event.str_field("toolCallId").unwrap_or("").to_string();
                let taken = self.accumulators.remove(&key);
                if !event.has("input") {
                    if let Some(Accumulator::ToolInput { args, .. }) = taken {
                        let input = if args.trim().is_empty() {
                            serde_json::json!({})
                        } else {
                            serde_json::from_str(&args).unwrap_or_else(|e| {
                                tracing::warn!(
                                    tool_call_id = %key,
                                    error = %e,
                                    "accumulated tool input is not valid JSON; defaulting to empty object"
                                );
                                serde_json::json!({})
                            })
                        };
                        event.set("input", input);
                    }
                }
                Some(event)
            }

            // Everything else passes through unchanged.
            _ => Some(event),
        }
    }

    fn open<F>(&mut self, event: &Event, key_field: &str, make: F)
    where
        F: FnOnce(&str) -> Accumulator,
    {
        let Some(key) = event.str_field(key_field) else {
            tracing::warn!(event_type = event.event_type(), "start event without an id; skipped");
            return;
        };
        self.accumulators.insert(key.to_string(), make(key));
    }

    fn append(&mut self, event: &Event, key_field: &str, delta_field: &str) {
        let Some(key) = event.str_field(key_field) else {
            return;
        };
        let Some(delta) = event.str_field(delta_field) else {
            return;
        };
        match self.accumulators.get_mut(key) {
            Some(Accumulator::Text(buf)) | Some(Accumulator::Reasoning(buf)) => {
                buf.push_str(delta)
            }
            Some(Accumulator::ToolInput { args, .. }) => args.push_str(delta),
            None => {
                // Orphan delta (no start): log and skip.
                tracing::warn!(
                    event_type = event.event_type(),
                    id = %key,
                    "orphan delta with no matching start; skipped"
                );
            }
        }
    }

    fn close<F>(&mut self, event: &Event, key_field: &str, finish: F) -> Option<Event>
    where
        F: FnOnce(&str, Accumulator) -> Option<Event>,
    {
        let key = event.str_field(key_field)?.to_string();
        match self.accumulators.remove(&key) {
            Some(acc) => finish(&key, acc),
            None => {
                tracing::warn!(
                    event_type = event.event_type(),
                    id = %key,
                    "end event with no matching start; skipped"
                );
                None
            }
        }
    }
}

//! Event-ordering validation over a loaded log.
//!
//! Checks the tool-call invariants: every `tool-input-available` id is
//! unique, and no output/denial/error precedes its input. Violations are
//! reported, not fatal; callers log them and continue (permissive mode).

use std::collections::HashSet;

use chimera_domain::event::{event_type, Event};

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Log everything this report found.
    pub fn log(&self, thread_id: &str) {
        for error in &self.errors {
            tracing::error!(thread_id, "ordering error: {error}");
        }
        for warning in &self.warnings {
            tracing::warn!(thread_id, "{warning}");
        }
    }
}

/// Validate tool-call ordering over events (blueprint excluded or not,
/// either works; the blueprint has no tool fields).
pub fn validate_event_ordering(events: &[Event]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen_inputs: HashSet<String> = HashSet::new();
    let mut resolved: HashSet<String> = HashSet::new();

    for (index, event) in events.iter().enumerate() {
        let line = index + 1;
        match event.event_type() {
            event_type::TOOL_INPUT_AVAILABLE => {
                let Some(id) = event.str_field("toolCallId") else {
                    report.errors.push(format!("line {line}: tool-input-available without toolCallId"));
                    continue;
                };
                if !seen_inputs.insert(id.to_string()) {
                    report
                        .errors
                        .push(format!("line {line}: duplicate tool-input-available for '{id}'"));
                }
            }
            event_type::TOOL_OUTPUT_AVAILABLE
            | event_type::TOOL_OUTPUT_DENIED
            | event_type::TOOL_ERROR => {
                let Some(id) = event.str_field("toolCallId") else {
                    continue;
                };
                if !seen_inputs.contains(id) {
                    report.errors.push(format!(
                        "line {line}: {} for '{id}' precedes its tool-input-available",
                        event.event_type()
                    ));
                }
                if !resolved.insert(id.to_string()) {
                    report
                        .warnings
                        .push(format!("line {line}: tool call '{id}' resolved more than once"));
                }
            }
            _ => {}
        }
    }

    report
}

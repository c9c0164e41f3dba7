//! Multi-agent transformer.
//!
//! Wraps the generic projection and reframes it for one agent's
//! perspective: text produced by *other* agents gets an
//! `(Agent: <Name>) - ` prefix. Tool calls and results are preserved in
//! full for every perspective; simplifying them to prose made agents
//! mimic the prose instead of calling tools.

use std::collections::BTreeMap;

use chimera_domain::event::{event_type, Event};
use chimera_domain::message::{ModelMessage, ResponsePart};

use super::generic::generic_transform;
use super::Transformer;

pub struct MultiAgentTransformer {
    /// identifier -> display name for every agent in the space.
    agents: BTreeMap<String, String>,
}

impl MultiAgentTransformer {
    pub fn new(agents: BTreeMap<String, String>) -> Self {
        Self { agents }
    }

    fn agent_name(&self, identifier: &str) -> &str {
        self.agents
            .get(identifier)
            .map(String::as_str)
            .unwrap_or("Unknown")
    }
}

impl Transformer for MultiAgentTransformer {
    fn transform(&self, events: &[Event], agent_id: Option<&str>) -> Vec<ModelMessage> {
        let base = generic_transform(events);
        let owners = response_owner_map(events);

        let mut formatted = Vec::with_capacity(base.len());
        let mut response_index = 0usize;

        for message in base {
            match message {
                ModelMessage::Response { parts, usage } => {
                    let owner = owners.get(response_index).map(String::as_str);
                    response_index += 1;

                    let foreign = matches!((owner, agent_id), (Some(o), Some(current)) if o != current);
                    let parts = if foreign {
                        let name = self.agent_name(owner.unwrap_or_default());
                        parts
                            .into_iter()
                            .map(|part| match part {
                                ResponsePart::Text { content } => ResponsePart::Text {
                                    content: format!("(Agent: {name}) - {content}"),
                                },
                                // Tool calls stay verbatim for all
                                // perspectives.
                                other => other,
                            })
                            .collect()
                    } else {
                        parts
                    };
                    formatted.push(ModelMessage::Response { parts, usage });
                }
                request => formatted.push(request),
            }
        }

        formatted
    }
}

/// Which agent produced each `ModelResponse` the generic projection
/// emits, in order.
///
/// Two counts are walked: one response per `finish-step`, and one per
/// agent turn. Whichever yields more entries matches the projection
/// (step-based logs produce a response per step; turn-based logs one per
/// turn).
fn response_owner_map(events: &[Event]) -> Vec<String> {
    let mut turn_map: Vec<String> = Vec::new();
    let mut step_map: Vec<String> = Vec::new();

    let mut current_turn_agent: Option<String> = None;
    for event in events {
        match event.event_type() {
            event_type::AGENT_START => {
                current_turn_agent = event.data_str("agentId").map(str::to_string);
            }
            event_type::AGENT_FINISH => {
                if let Some(agent) = current_turn_agent.take() {
                    turn_map.push(agent);
                }
            }
            _ => {}
        }
    }

    let mut current_step_agent: Option<String> = None;
    for event in events {
        match event.event_type() {
            event_type::AGENT_START => {
                current_step_agent = event.data_str("agentId").map(str::to_string);
            }
            event_type::FINISH_STEP => {
                if let Some(agent) = &current_step_agent {
                    step_map.push(agent.clone());
                }
            }
            event_type::AGENT_FINISH => {
                if let Some(agent) = current_step_agent.take() {
                    step_map.push(agent);
                }
            }
            _ => {}
        }
    }

    if step_map.len() >= turn_map.len() {
        step_map
    } else {
        turn_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_domain::message::RequestPart;

    fn transformer() -> MultiAgentTransformer {
        let mut agents = BTreeMap::new();
        agents.insert("alice".to_string(), "Alice".to_string());
        agents.insert("bob".to_string(), "Bob".to_string());
        MultiAgentTransformer::new(agents)
    }

    fn two_agent_log() -> Vec<Event> {
        vec![
            Event::user_turn_start(),
            Event::user_message("hello both"),
            Event::user_turn_end(),
            Event::agent_start("alice", "Alice", "msg_1"),
            Event::text_complete("t1", "hi from alice"),
            Event::agent_finish("alice", "Alice", "msg_1"),
            Event::agent_start("bob", "Bob", "msg_2"),
            Event::text_complete("t2", "hi from bob"),
            Event::agent_finish("bob", "Bob", "msg_2"),
        ]
    }

    #[test]
    fn prefixes_other_agents_text() {
        let messages = transformer().transform(&two_agent_log(), Some("bob"));

        let texts: Vec<String> = messages.iter().map(|m| m.response_text()).collect();
        assert!(texts.contains(&"(Agent: Alice) - hi from alice".to_string()));
        assert!(texts.contains(&"hi from bob".to_string()));
    }

    #[test]
    fn own_text_is_unprefixed() {
        let messages = transformer().transform(&two_agent_log(), Some("alice"));
        let texts: Vec<String> = messages.iter().map(|m| m.response_text()).collect();
        assert!(texts.contains(&"hi from alice".to_string()));
        assert!(texts.contains(&"(Agent: Bob) - hi from bob".to_string()));
    }

    #[test]
    fn tool_calls_stay_verbatim_for_other_agents() {
        let events = vec![
            Event::agent_start("alice", "Alice", "msg_1"),
            Event::tool_input_available("c1", "search", serde_json::json!({"q": "x"})),
            Event::tool_output_available("c1", "search", serde_json::json!("results")),
            Event::agent_finish("alice", "Alice", "msg_1"),
        ];
        let messages = transformer().transform(&events, Some("bob"));

        let has_verbatim_call = messages.iter().any(|m| {
            matches!(m, ModelMessage::Response { parts, .. }
                if matches!(&parts[0], ResponsePart::ToolCall { tool_name, .. } if tool_name == "search"))
        });
        let has_verbatim_return = messages.iter().any(|m| {
            matches!(m, ModelMessage::Request { parts }
                if matches!(&parts[0], RequestPart::ToolReturn { tool_name, .. } if tool_name == "search"))
        });
        assert!(has_verbatim_call);
        assert!(has_verbatim_return);
    }

    #[test]
    fn step_based_logs_map_owners_per_step() {
        let events = vec![
            Event::agent_start("alice", "Alice", "msg_1"),
            Event::start_step(),
            Event::tool_input_available("c1", "search", serde_json::json!({})),
            Event::finish_step(None),
            Event::tool_output_available("c1", "search", serde_json::json!("r")),
            Event::start_step(),
            Event::text_complete("t", "found it"),
            Event::finish_step(None),
            Event::agent_finish("alice", "Alice", "msg_1"),
        ];
        let messages = transformer().transform(&events, Some("bob"));
        let texts: Vec<String> = messages.iter().map(|m| m.response_text()).collect();
        assert!(texts.contains(&"(Agent: Alice) - found it".to_string()));
    }

    #[test]
    fn unknown_owner_gets_unknown_label() {
        let events = vec![
            Event::agent_start("ghost", "Ghost", "msg_1"),
            Event::text_complete("t", "boo"),
            Event::agent_finish("ghost", "Ghost", "msg_1"),
        ];
        let messages = transformer().transform(&events, Some("alice"));
        assert_eq!(messages[0].response_text(), "(Agent: Unknown) - boo");
    }
}

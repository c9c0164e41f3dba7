//! Message-history transformers: project a log slice into the
//! `ModelMessage` sequence an LLM sees.
//!
//! Three variants, chosen by the space:
//! - [`GenericTransformer`] — pass-through, single perspective
//! - [`MultiAgentTransformer`] — prefixes other agents' text with their
//!   name; tool calls stay verbatim for every perspective
//! - [`EmptyTransformer`] — no history, for stateless graph nodes

mod generic;
mod multi_agent;

pub use generic::GenericTransformer;
pub use multi_agent::MultiAgentTransformer;

use chimera_domain::event::Event;
use chimera_domain::input::{
    ApprovalDecision, DeferredToolResults, ToolDecision, UserInput,
};
use chimera_domain::message::ModelMessage;

/// Log → LLM message projection. Must be a pure function of the events:
/// the projection is identical before and after an approval round-trip;
/// only the deferred-results bundle differs.
pub trait Transformer: Send + Sync {
    /// `agent_id` is the perspective (multi-agent only); generic and
    /// empty transformers ignore it.
    fn transform(&self, events: &[Event], agent_id: Option<&str>) -> Vec<ModelMessage>;

    /// Build the resume bundle from a `deferred_tools` input. Approval is
    /// independent of conversation history, so even the empty transformer
    /// supports it.
    fn build_deferred_tool_results(
        &self,
        _events: &[Event],
        input: &UserInput,
    ) -> Option<DeferredToolResults> {
        build_deferred_tool_results(input)
    }
}

/// Returns empty history: each turn starts with a clean slate. Used by
/// graph-style spaces whose nodes are intentionally stateless.
pub struct EmptyTransformer;

impl Transformer for EmptyTransformer {
    fn transform(&self, _events: &[Event], _agent_id: Option<&str>) -> Vec<ModelMessage> {
        Vec::new()
    }
}

/// Shared bundle construction for all transformers.
pub fn build_deferred_tool_results(input: &UserInput) -> Option<DeferredToolResults> {
    let UserInput::DeferredTools { approvals, calls, .. } = input else {
        return None;
    };

    let mut results = DeferredToolResults::default();
    for (tool_call_id, decision) in approvals {
        let resolved = match decision {
            ApprovalDecision::Simple(true) => ToolDecision::Approved { override_args: None },
            ApprovalDecision::Simple(false) => ToolDecision::Denied {
                message: "User denied this action".into(),
            },
            ApprovalDecision::Detailed { approved: true, override_args, .. } => {
                ToolDecision::Approved { override_args: override_args.clone() }
            }
            ApprovalDecision::Detailed { approved: false, message, .. } => ToolDecision::Denied {
                message: message
                    .clone()
                    .unwrap_or_else(|| "User denied this action".into()),
            },
        };
        results.approvals.insert(tool_call_id.clone(), resolved);
    }
    for (tool_call_id, result) in calls {
        results.calls.insert(tool_call_id.clone(), result.clone());
    }

    Some(results)
}

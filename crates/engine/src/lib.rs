//! The thread execution engine.
//!
//! Given a hydrated space and a user input, the engine drives agent turns
//! against an abstract model handle, emitting a VSP event stream to the
//! live queue and the condensed ThreadProtocol to the durable log.
//!
//! Layering, leaves first:
//! - [`plugin`] / [`toolset`] — the widget/space extension surface
//! - [`state`] / [`streaming`] — shared thread state and the single seam
//!   every outbound event passes through
//! - [`transform`] — log → LLM message history projection
//! - [`agent`] / [`runner`] — one agent, one turn
//! - [`space`] — orchestration archetypes (generic, roster, graph)
//! - [`thread`] — the multi-turn driver

pub mod agent;
pub mod plugin;
pub mod runner;
pub mod space;
pub mod state;
pub mod streaming;
pub mod thread;
pub mod toolset;
pub mod transform;

pub use plugin::{HookContext, HookResult, Hooks, Plugin, StatefulPlugin};
pub use runner::TurnOutcome;
pub use space::{Space, TurnDecision};
pub use state::{SharedThreadLog, ThreadState};
pub use streaming::{EventSink, StreamingInfrastructure};
pub use thread::{run_thread, ThreadDeps};

//! Model access: the abstract model handle the engine drives.
//!
//! The engine never sees provider wire formats. It builds a
//! [`ModelRequest`] (system prompt + message history + tool definitions)
//! and consumes a stream of [`chimera_domain::stream::ModelEvent`]s. Tool
//! execution happens in the engine's step loop, not here.
//!
//! One concrete adapter ships (OpenRouter, OpenAI-compatible SSE); the
//! [`scripted`] module provides a deterministic model for tests.

pub mod openrouter;
pub mod registry;
pub mod scripted;
pub mod sse;
pub mod traits;

pub use registry::{ModelRegistry, ModelResolver};
pub use traits::{ModelClient, ModelRequest};

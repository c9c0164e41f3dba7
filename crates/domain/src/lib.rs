//! Shared domain types used across all Chimera crates.
//!
//! Everything here is a leaf: no I/O, no async machinery beyond the
//! [`stream::BoxStream`] alias. The other crates (protocol, providers,
//! engine, gateway) all depend on this one.

pub mod blueprint;
pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod message;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
pub use event::Event;

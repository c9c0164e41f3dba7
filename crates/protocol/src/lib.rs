//! ThreadProtocol persistence: the append-only, replayable JSONL event log.
//!
//! The log is the single source of truth for a conversation. Streaming
//! deltas never reach disk: the [`condense::EventCondenser`] collapses
//! every `*-start/delta/end` family into one `*-complete` event on the way
//! through the writer.

pub mod condense;
pub mod reader;
pub mod store;
pub mod validate;
pub mod writer;

pub use condense::EventCondenser;
pub use reader::ThreadProtocolReader;
pub use store::ThreadStore;
pub use writer::{EventWriter, JsonlWriter, NoOpWriter};

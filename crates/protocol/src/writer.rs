//! Append-only JSONL log writers.
//!
//! Each thread gets a `<threadId>.jsonl` file. Every event is one line,
//! written immediately and flushed. Non-blueprint events pass through the
//! condenser: only condensed events reach disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use chimera_domain::blueprint::Blueprint;
use chimera_domain::error::{Error, Result};
use chimera_domain::event::Event;
use chimera_domain::trace::TraceEvent;

use crate::condense::EventCondenser;

/// Sink for ThreadProtocol events.
///
/// [`JsonlWriter`] persists to disk; [`NoOpWriter`] satisfies the same
/// interface for streaming-only deployments where the client owns
/// persistence.
#[async_trait::async_trait]
pub trait EventWriter: Send + Sync {
    /// Write one event. Deltas are accumulated; the condensed event is
    /// written when its family closes.
    async fn write_event(&self, event: Event) -> Result<()>;

    /// Write the blueprint (must be the first line). Bypasses condensation.
    async fn write_blueprint(&self, blueprint: &Blueprint) -> Result<()>;

    /// Discard partial condenser state (e.g. between messages).
    fn reset_condenser(&self);
}

struct WriterInner {
    file: std::fs::File,
    condenser: EventCondenser,
}

/// Writes condensed events to a JSONL file, one per line, flushed after
/// each write. Writes are serialized by an internal mutex.
pub struct JsonlWriter {
    path: PathBuf,
    inner: Mutex<WriterInner>,
}

impl JsonlWriter {
    /// Open (or create) the log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        TraceEvent::LogOpened { path: path.display().to_string() }.emit();
        Ok(Self {
            path,
            inner: Mutex::new(WriterInner { file, condenser: EventCondenser::new() }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(file: &mut std::fs::File, event: &Event) -> Result<()> {
        let mut line = event.to_json_line();
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(Error::Io)?;
        file.flush().map_err(Error::Io)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventWriter for JsonlWriter {
    async fn write_event(&self, event: Event) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(mut condensed) = inner.condenser.process(event) {
            condensed.touch_timestamp();
            Self::write_line(&mut inner.file, &condensed)?;
        }
        Ok(())
    }

    async fn write_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        let event = blueprint.to_event();
        let mut inner = self.inner.lock();
        Self::write_line(&mut inner.file, &event)
    }

    fn reset_condenser(&self) {
        self.inner.lock().condenser.reset();
    }
}

/// Discards everything. Used when the client owns persistence and in
/// tests that don't need a log file.
#[derive(Debug, Default)]
pub struct NoOpWriter;

#[async_trait::async_trait]
impl EventWriter for NoOpWriter {
    async fn write_event(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    async fn write_blueprint(&self, _blueprint: &Blueprint) -> Result<()> {
        Ok(())
    }

    fn reset_condenser(&self) {}
}

//! Streaming infrastructure: the single seam between the engine and the
//! outside world.
//!
//! Everything that should reach the client or the log passes through an
//! [`EventSink`]. The production implementation
//! ([`StreamingInfrastructure`]) fans out to the live queue and the
//! durable writer; tests use [`CollectingSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use chimera_domain::error::Result;
use chimera_domain::event::{event_type, Event};
use chimera_domain::trace::TraceEvent;
use chimera_protocol::writer::EventWriter;

use crate::state::SharedThreadLog;

/// One item on the live queue; `None` is the end-of-stream sentinel.
pub type QueueItem = Option<Event>;

/// Outbound event seam.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Enqueue a live wire event. Inserts `threadId` when
    /// `include_thread_id` is set and the event doesn't already carry one;
    /// delta events pass `false`.
    async fn emit_vsp(&self, event: Event, include_thread_id: bool);

    /// Write to the durable log (through the condenser). Mutation events
    /// are mirrored to the live stream so clients see them in real time;
    /// transient events skip persistence but still stream.
    async fn emit_protocol(&self, event: Event) -> Result<()>;

    /// Log first, stream second. The common path for boundary events.
    async fn emit_both(&self, event: Event, include_thread_id: bool) -> Result<()> {
        self.emit_protocol(event.clone()).await?;
        self.emit_vsp(event, include_thread_id).await;
        Ok(())
    }
}

/// Production sink: fans every event out to the live queue, the durable
/// writer, and the in-memory log view.
pub struct StreamingInfrastructure {
    thread_id: Uuid,
    queue: mpsc::UnboundedSender<QueueItem>,
    writer: Arc<dyn EventWriter>,
    log: Arc<SharedThreadLog>,
    verbose: bool,
    events_sent: AtomicU64,
}

impl StreamingInfrastructure {
    pub fn new(
        thread_id: Uuid,
        queue: mpsc::UnboundedSender<QueueItem>,
        writer: Arc<dyn EventWriter>,
        log: Arc<SharedThreadLog>,
        verbose: bool,
    ) -> Self {
        Self {
            thread_id,
            queue,
            writer,
            log,
            verbose,
            events_sent: AtomicU64::new(0),
        }
    }

    /// Place the end-of-stream sentinel on the queue.
    pub fn close(&self) {
        let _ = self.queue.send(None);
        TraceEvent::StreamClosed {
            thread_id: self.thread_id.to_string(),
            events_sent: self.events_sent.load(Ordering::Relaxed),
        }
        .emit();
    }

    fn log_vsp_event(&self, event: &Event) {
        if self.verbose {
            tracing::info!(event = %event.to_json_line(), "sse emit");
        } else if event.is(event_type::ERROR) {
            tracing::error!(
                thread_id = %self.thread_id,
                error_text = event.str_field("errorText").unwrap_or("?"),
                "sse emit: error"
            );
        } else if !event.is_delta() {
            tracing::info!(
                thread_id = %self.thread_id,
                event_type = event.event_type(),
                "sse emit"
            );
        }
    }
}

#[async_trait::async_trait]
impl EventSink for StreamingInfrastructure {
    async fn emit_vsp(&self, mut event: Event, include_thread_id: bool) {
        // Boundary events carry threadId; never overwrite one that an
        // upstream emitter already set.
        if include_thread_id && !event.has("threadId") {
            event.set("threadId", self.thread_id.to_string());
        }
        self.log_vsp_event(&event);
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        // Receiver gone means the client disconnected; the worker is about
        // to be cancelled anyway.
        let _ = self.queue.send(Some(event));
    }

    async fn emit_protocol(&self, event: Event) -> Result<()> {
        if event.is_transient() {
            // Not persisted, but the client still sees it.
            self.emit_vsp(event, true).await;
            return Ok(());
        }

        if self.verbose {
            tracing::info!(event = %event.to_json_line(), "protocol emit");
        } else {
            tracing::debug!(event_type = event.event_type(), "protocol emit");
        }

        let is_mutation = event.is(event_type::APP_MUTATION);
        self.writer.write_event(event.clone()).await?;
        self.log.ingest(event.clone());

        if is_mutation {
            self.emit_vsp(event, true).await;
        }
        Ok(())
    }
}

/// Test sink that records everything.
#[derive(Default)]
pub struct CollectingSink {
    vsp: parking_lot::Mutex<Vec<Event>>,
    protocol: parking_lot::Mutex<Vec<Event>>,
    log: Arc<SharedThreadLog>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build a sink sharing `log`, so transforms see emitted events.
    pub fn with_log(log: Arc<SharedThreadLog>) -> Arc<Self> {
        Arc::new(Self { log, ..Default::default() })
    }

    pub fn vsp_events(&self) -> Vec<Event> {
        self.vsp.lock().clone()
    }

    pub fn vsp_types(&self) -> Vec<String> {
        self.vsp.lock().iter().map(|e| e.event_type().to_string()).collect()
    }

    /// Condensed protocol events, i.e. what the log would contain.
    pub fn protocol_events(&self) -> Vec<Event> {
        self.log.snapshot()
    }

    /// Raw events handed to `emit_protocol` before condensation.
    pub fn raw_protocol_events(&self) -> Vec<Event> {
        self.protocol.lock().clone()
    }
}

#[async_trait::async_trait]
impl EventSink for CollectingSink {
    async fn emit_vsp(&self, mut event: Event, include_thread_id: bool) {
        if include_thread_id && !event.has("threadId") {
            event.set("threadId", "test-thread");
        }
        self.vsp.lock().push(event);
    }

    async fn emit_protocol(&self, event: Event) -> Result<()> {
        if event.is_transient() {
            self.emit_vsp(event, true).await;
            return Ok(());
        }
        self.protocol.lock().push(event.clone());
        let is_mutation = event.is(event_type::APP_MUTATION);
        self.log.ingest(event.clone());
        if is_mutation {
            self.emit_vsp(event, true).await;
        }
        Ok(())
    }
}

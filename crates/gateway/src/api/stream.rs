//! `POST /stream`: the thread execution endpoint.
//!
//! The client posts its full ThreadProtocol history plus a user input.
//! The handler reconstructs the space from the blueprint, spawns a worker
//! that drives turns, and drains the event queue back as SSE until the
//! worker places the sentinel. Client disconnects cancel the worker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chimera_domain::blueprint::{Blueprint, THREAD_PROTOCOL_VERSION};
use chimera_domain::event::{event_type, Event};
use chimera_domain::input::UserInput;
use chimera_domain::trace::TraceEvent;
use chimera_engine::space::hydrate_space;
use chimera_engine::state::{SharedThreadLog, ThreadState};
use chimera_engine::streaming::{EventSink, QueueItem, StreamingInfrastructure};
use chimera_engine::thread::{run_thread, ThreadDeps};
use chimera_protocol::writer::{EventWriter, JsonlWriter, NoOpWriter};

use crate::registry::ActiveTaskRegistry;
use crate::state::AppState;

/// Per-item wait before declaring the worker unresponsive.
const QUEUE_ITEM_TIMEOUT: Duration = Duration::from_secs(30);
/// Queue depth above which we log a stalled-consumer warning.
const QUEUE_WARN_DEPTH: usize = 50;

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub thread_protocol: Vec<serde_json::Value>,
    pub user_input: UserInput,
}

pub async fn stream(State(state): State<AppState>, Json(body): Json<StreamRequest>) -> Response {
    // ── Request validation (422, no log mutated) ───────────────────
    if body.thread_protocol.is_empty() {
        return validation_error("thread_protocol cannot be empty - must have a blueprint");
    }
    let mut events = Vec::with_capacity(body.thread_protocol.len());
    for (index, value) in body.thread_protocol.into_iter().enumerate() {
        match Event::from_value(value) {
            Ok(event) => events.push(event),
            Err(e) => return validation_error(&format!("invalid event at index {index}: {e}")),
        }
    }
    if !events[0].is(event_type::THREAD_BLUEPRINT) {
        return validation_error("first ThreadProtocol event must be thread-blueprint");
    }
    let blueprint = match Blueprint::from_event(&events[0]) {
        Ok(blueprint) => blueprint,
        Err(e) => return validation_error(&format!("invalid blueprint: {e}")),
    };

    // ── Version gate: fail the stream, do not mutate the log ───────
    if blueprint.thread_protocol_version != THREAD_PROTOCOL_VERSION {
        return error_stream(format!(
            "ThreadProtocol version mismatch: expected {THREAD_PROTOCOL_VERSION}, got {}",
            blueprint.thread_protocol_version
        ));
    }

    // ── Hydrate the space and reconstruct state ────────────────────
    let space = match hydrate_space(&blueprint, &state.widgets) {
        Ok(space) => space,
        Err(e) => return error_stream(format!("failed to hydrate space: {e}")),
    };

    let thread_id = blueprint.thread_id;
    let history = events.split_off(1);

    let writer: Arc<dyn EventWriter> = match &state.threads {
        Some(store) => {
            let path = store.path_for(&thread_id.to_string());
            let is_new = !path.exists();
            match JsonlWriter::open(&path) {
                Ok(writer) => {
                    if is_new {
                        if let Err(e) = writer.write_blueprint(&blueprint).await {
                            return error_stream(format!("failed to write blueprint: {e}"));
                        }
                    }
                    Arc::new(writer)
                }
                Err(e) => return error_stream(format!("failed to open thread log: {e}")),
            }
        }
        None => Arc::new(NoOpWriter),
    };

    // ── Wire the streaming infrastructure ──────────────────────────
    let (queue_tx, queue_rx) = mpsc::unbounded_channel::<QueueItem>();
    let log = Arc::new(SharedThreadLog::seeded(history));
    let infra = Arc::new(StreamingInfrastructure::new(
        thread_id,
        queue_tx,
        writer,
        log.clone(),
        state.config.verbose_sse,
    ));
    let thread_state = Arc::new(ThreadState::new(&blueprint, log));

    let cancel = CancellationToken::new();
    let deps = ThreadDeps {
        state: thread_state,
        sink: infra.clone(),
        resolver: state.resolver.clone(),
        cancel: cancel.clone(),
        client_context: body.user_input.client_context().cloned(),
    };

    // ── Spawn the worker ───────────────────────────────────────────
    state.registry.register(thread_id, cancel.clone());
    let worker_registry = state.registry.clone();
    let worker_infra = infra.clone();
    let user_input = body.user_input;
    tokio::spawn(async move {
        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        worker_infra.emit_vsp(Event::start(&message_id), true).await;

        match run_thread(space, deps, user_input).await {
            Ok(()) => {
                worker_infra.emit_vsp(Event::finish(&message_id), true).await;
            }
            Err(e) if e.is_cancelled() => {
                TraceEvent::TaskCancelled { thread_id: thread_id.to_string() }.emit();
                worker_infra
                    .emit_vsp(Event::error("Execution halted by user"), true)
                    .await;
            }
            Err(e) => {
                tracing::error!(%thread_id, error = %e, "thread execution failed");
                worker_infra.emit_vsp(Event::error(&e.to_string()), true).await;
            }
        }

        // Cleanup always runs: sentinel first, then unregister.
        worker_infra.close();
        worker_registry.remove(&thread_id);
    });

    sse_response(drain_queue(
        queue_rx,
        DisconnectGuard { thread_id, cancel, registry: state.registry.clone() },
    ))
}

/// Cancels the worker when the SSE stream is dropped (client
/// disconnect) or finishes.
struct DisconnectGuard {
    thread_id: Uuid,
    cancel: CancellationToken,
    registry: Arc<ActiveTaskRegistry>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.remove(&self.thread_id);
    }
}

/// Drain the worker's queue as SSE lines, time-bounded per item, with
/// backpressure detection. `None` on the queue ends the stream with
/// `[DONE]`.
fn drain_queue(
    mut queue_rx: mpsc::UnboundedReceiver<QueueItem>,
    guard: DisconnectGuard,
) -> impl futures_util::Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        let mut consecutive_deep: u32 = 0;

        loop {
            let depth = queue_rx.len();
            if depth > QUEUE_WARN_DEPTH {
                consecutive_deep += 1;
                // Rate-limit: the queue is unbounded, this only detects a
                // stalled consumer.
                if consecutive_deep % 10 == 0 {
                    tracing::warn!(depth, consecutive = consecutive_deep, "event queue backing up");
                }
            } else {
                consecutive_deep = 0;
            }

            match tokio::time::timeout(QUEUE_ITEM_TIMEOUT, queue_rx.recv()).await {
                Err(_) => {
                    tracing::error!(
                        timeout_secs = QUEUE_ITEM_TIMEOUT.as_secs(),
                        "queue timeout - worker may have crashed"
                    );
                    let error = Event::error("Internal timeout - worker unresponsive");
                    yield Ok(SseEvent::default().data(error.to_json_line()));
                    break;
                }
                // Sentinel or closed channel: end of stream.
                Ok(None) | Ok(Some(None)) => {
                    yield Ok(SseEvent::default().data("[DONE]"));
                    break;
                }
                Ok(Some(Some(event))) => {
                    yield Ok(SseEvent::default().data(event.to_json_line()));
                }
            }
        }
    }
}

fn sse_response(
    stream: impl futures_util::Stream<Item = Result<SseEvent, std::convert::Infallible>> + Send + 'static,
) -> Response {
    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

fn validation_error(detail: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

/// A stream that emits a single error event and `[DONE]`. Used for
/// failures after validation but before the worker exists (version
/// mismatch, hydration errors).
fn error_stream(message: String) -> Response {
    tracing::error!(error = %message, "stream rejected");
    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(
            SseEvent::default().data(Event::error(&message).to_json_line()),
        );
        yield Ok(SseEvent::default().data("[DONE]"));
    };
    sse_response(stream)
}

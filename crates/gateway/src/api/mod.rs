//! API surface.
//!
//! - `GET /` — liveness probe
//! - `POST /stream` — run a thread, stream VSP events as SSE
//! - `POST /halt` — cancel a running thread

pub mod stream;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/stream", post(stream::stream))
        .route("/halt", post(halt))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct HaltRequest {
    thread_id: String,
}

/// Cancel a running thread. The worker observes the cancellation at its
/// next suspension point, emits the halt error event, and cleans up.
async fn halt(State(state): State<AppState>, Json(body): Json<HaltRequest>) -> Json<serde_json::Value> {
    let Ok(thread_id) = uuid::Uuid::parse_str(&body.thread_id) else {
        return Json(serde_json::json!({
            "status": "not_found",
            "thread_id": body.thread_id,
            "message": "Invalid thread id",
        }));
    };

    if state.registry.cancel(&thread_id) {
        tracing::info!(%thread_id, "halt requested");
        Json(serde_json::json!({
            "status": "cancelled",
            "thread_id": body.thread_id,
            "message": "Thread execution halted",
        }))
    } else {
        Json(serde_json::json!({
            "status": "not_found",
            "thread_id": body.thread_id,
            "message": "No active execution found for this thread",
        }))
    }
}

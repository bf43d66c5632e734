use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::routes::AppState;

pub const SERVICE_NAME: &str = "relay-server";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub signature_verification: bool,
    pub worker_queue_slots: usize,
    pub checked_at: String,
}

/// Liveness only: reports process state without calling upstream providers.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        signature_verification: state.dispatcher.verifies_signatures(),
        worker_queue_slots: state.dispatcher.pool().available_slots(),
        checked_at: Utc::now().to_rfc3339(),
    })
}

pub async fn index() -> &'static str {
    "relay-server: Slack question-answering relay. POST Slack events to /slack/events."
}

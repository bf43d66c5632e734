use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_slack::{AcceptError, Acknowledgement, EventDispatcher, InboundRequest};
use serde_json::json;
use tracing::error;

use crate::health;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";
const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<EventDispatcher>,
}

pub fn router(dispatcher: Arc<EventDispatcher>) -> Router {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        .route("/slack/events", post(slack_events))
        .with_state(AppState { dispatcher })
}

/// Acknowledges within the request; all pipeline work happens on the
/// worker pool.
async fn slack_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = InboundRequest {
        body: &body,
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
        signature: header_str(&headers, SIGNATURE_HEADER),
        retry_num: header_str(&headers, RETRY_NUM_HEADER).and_then(|value| value.parse().ok()),
    };

    match state.dispatcher.accept(&request) {
        Ok(Acknowledgement::Challenge(challenge)) => {
            (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response()
        }
        Ok(_) => StatusCode::OK.into_response(),
        Err(AcceptError::Signature(_)) => StatusCode::UNAUTHORIZED.into_response(),
        Err(AcceptError::Payload(_)) => StatusCode::BAD_REQUEST.into_response(),
        Err(AcceptError::Lifecycle(lifecycle_error)) => {
            error!(
                event_name = "ingress.slack.lifecycle_error",
                error = %lifecycle_error,
                "event could not be acknowledged"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

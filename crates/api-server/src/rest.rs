//! REST API handlers for notification submission and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use notify_core::{CancellationToken, EngineState};
use notify_delivery::NotificationEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Maximum subject length, in characters.
const MAX_SUBJECT_LEN: usize = 256;

/// Maximum body size, in bytes.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<NotificationEngine>,
    /// Host shutdown signal, used as the per-request cancellation.
    pub shutdown: CancellationToken,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Deserialize)]
pub struct NotificationPayload {
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub success: bool,
}

/// Validate a notification at the API boundary.
fn validate_payload(payload: &NotificationPayload) -> Result<(), &'static str> {
    if payload.subject.trim().is_empty() {
        return Err("notification 'subject' must not be empty");
    }
    if payload.subject.chars().count() > MAX_SUBJECT_LEN {
        return Err("notification 'subject' exceeds maximum length");
    }
    if payload.body.len() > MAX_BODY_BYTES {
        return Err("notification 'body' exceeds maximum size");
    }
    Ok(())
}

/// POST /v1/notifications — submit a notification.
///
/// `Ok(true)` and `Ok(false)` from the engine both map to 200 with the
/// boolean in the payload; an engine error maps to 500.
pub async fn handle_notification(
    State(state): State<AppState>,
    Json(payload): Json<NotificationPayload>,
) -> Result<Json<NotificationResponse>, (StatusCode, Json<ErrorResponse>)> {
    if let Err(msg) = validate_payload(&payload) {
        warn!(error = msg, "Notification validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_notification".to_string(),
                message: msg.to_string(),
            }),
        ));
    }

    metrics::counter!("api.notifications").increment(1);

    match state
        .engine
        .send(&payload.subject, &payload.body, &state.shutdown)
        .await
    {
        Ok(success) => Ok(Json(NotificationResponse { success })),
        Err(e) => {
            error!(error = %e, subject = %payload.subject, "Notification request failed");
            metrics::counter!("api.errors").increment(1);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "notification_failed".to_string(),
                    message: e.to_string(),
                }),
            ))
        }
    }
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_state = state.engine.state();
    Json(HealthResponse {
        status: match engine_state {
            EngineState::Active => "healthy",
            EngineState::Disposed => "disposed",
        }
        .to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine_state,
        pending: state.engine.pending_len(),
    })
}

/// GET /ready — Readiness probe. 200 while the engine accepts work.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.engine.state() {
        EngineState::Active => StatusCode::OK,
        EngineState::Disposed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub engine_state: EngineState,
    pub pending: usize,
}

use super::state::AppState;
use crate::audio::InputFormat;
use crate::error::{CaptureError, ConnectionError, SessionError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Service url; the configured one if omitted
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ListeningResponse {
    pub status: String,
    pub input: InputFormat,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotConnected
        | SessionError::Capture(CaptureError::AlreadyCapturing)
        | SessionError::Connection(ConnectionError::AlreadyConnected) => StatusCode::CONFLICT,
        SessionError::Connection(ConnectionError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
        SessionError::Capture(_) | SessionError::Connection(ConnectionError::Connect(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Stopped => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SessionError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Session request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn action_response(status: &str, message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(ActionResponse {
            status: status.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Current conversation snapshot
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.snapshot()))
}

/// GET /session/stats
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.stats()))
}

/// POST /session/connect
/// Manual (re)connect; there is no automatic retry
pub async fn connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectRequest>>,
) -> Response {
    let url = body.and_then(|Json(req)| req.url);
    info!("Connect requested over HTTP");

    match state.session.connect(url).await {
        Ok(()) => action_response("connected", state.session.snapshot().connection_label),
        Err(e) => error_response(e),
    }
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Response {
    match state.session.disconnect().await {
        Ok(()) => action_response("disconnected", "Connection closed"),
        Err(e) => error_response(e),
    }
}

/// POST /session/listen/start
pub async fn start_listening(State(state): State<AppState>) -> Response {
    match state.session.start_listening().await {
        Ok(input) => (
            StatusCode::OK,
            Json(ListeningResponse {
                status: "listening".to_string(),
                input,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/listen/stop
pub async fn stop_listening(State(state): State<AppState>) -> Response {
    match state.session.stop_listening().await {
        Ok(()) => action_response("idle", "Listening stopped"),
        Err(e) => error_response(e),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

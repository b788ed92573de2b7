//! Status and health check endpoints, plus the response envelope and error
//! type shared by every handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use converge_sync_core::errors::{SyncError, UnknownSyncType};
use converge_sync_core::models::TypeStatus;

use crate::AppState;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// `{ "success": bool, "data"?: …, "error"?: string }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wrap `data` in a successful envelope.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    ok: bool,
    version: &'static str,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Unauthenticated routes.
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/health", get(health_check))
}

/// Admin routes, mounted under the admin prefix.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/status", get(get_status))
}

async fn health_check() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<TypeStatus>>>, AppError> {
    Ok(ok(state.coordinator.get_sync_status()?))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error that renders as a failed envelope.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unauthorized(String),
    Internal(String),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Conflict { .. } => AppError::Conflict(err.to_string()),
            SyncError::NotFound(_) => AppError::NotFound(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<UnknownSyncType> for AppError {
    fn from(err: UnknownSyncType) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

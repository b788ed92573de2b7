//! Run triggering, failure ledger and run history endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use converge_sync_core::db::DEFAULT_LIST_LIMIT;
use converge_sync_core::models::{
    FailedSyncRecord, FailureFilter, FailureStatus, RetryOutcome, SyncRun, SyncType,
};

use crate::api::auth::AdminIdentity;
use crate::api::status::{ok, ApiResponse, AppError};
use crate::AppState;

/// Upper bound on any `limit` query parameter.
const MAX_LIST_LIMIT: u32 = 500;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FailedQuery {
    #[serde(rename = "type")]
    pub sync_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct ClearQuery {
    #[serde(rename = "type")]
    pub sync_type: Option<String>,
}

#[derive(Deserialize)]
pub struct RunsQuery {
    #[serde(rename = "type")]
    pub sync_type: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    removed: usize,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/failed", get(list_failed))
        .route("/sync/:sync_type", post(trigger_sync))
        .route("/retry/:id", post(retry))
        .route("/clear-failed", delete(clear_failed))
        .route("/runs", get(list_runs))
}

/// Parse an optional `?type=` value.
pub(crate) fn parse_type(raw: Option<&str>) -> Result<Option<SyncType>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.parse::<SyncType>().map_err(AppError::from))
        .transpose()
}

async fn list_failed(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<ApiResponse<Vec<FailedSyncRecord>>>, AppError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<FailureStatus>().map_err(AppError::BadRequest))
        .transpose()?;
    let filter = FailureFilter {
        sync_type: parse_type(query.sync_type.as_deref())?,
        status,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)),
    };
    Ok(ok(state.coordinator.list_failed(&filter)?))
}

async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminIdentity>,
    Path(sync_type): Path<String>,
) -> Result<Json<ApiResponse<SyncRun>>, AppError> {
    let sync_type: SyncType = sync_type.parse()?;
    let run = state
        .coordinator
        .trigger_sync(sync_type, admin.actor())
        .await?;
    Ok(ok(run))
}

async fn retry(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RetryOutcome>>, AppError> {
    Ok(ok(state.coordinator.retry_sync(&id, admin.actor()).await?))
}

async fn clear_failed(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminIdentity>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ApiResponse<ClearResponse>>, AppError> {
    let filter = FailureFilter {
        sync_type: parse_type(query.sync_type.as_deref())?,
        ..Default::default()
    };
    let removed = state.coordinator.clear_failed(&filter, admin.actor())?;
    Ok(ok(ClearResponse { removed }))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<SyncRun>>>, AppError> {
    let sync_type = parse_type(query.sync_type.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    Ok(ok(state.coordinator.list_runs(sync_type, limit)?))
}

//! Import and export endpoints returning row-level detail.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Router};
use serde::Serialize;

use converge_sync_core::models::{SyncRun, SyncType};

use crate::api::auth::AdminIdentity;
use crate::api::status::{ok, AppError};
use crate::AppState;

/// A finished run with the pipeline's counts inlined beside it, so
/// `data.imported` and `data.errors` sit at the top of the envelope.
#[derive(Serialize)]
pub struct RunReport<O: Serialize> {
    run: SyncRun,
    #[serde(flatten)]
    outcome: O,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/import/:target", post(import))
        .route("/export/:sync_type", post(export))
}

/// `POST /import/:type`, or every configured type for `/import/all`.
async fn import(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminIdentity>,
    Path(target): Path<String>,
) -> Result<Response, AppError> {
    if target.eq_ignore_ascii_case("all") {
        let result = state.coordinator.import_all(admin.actor()).await;
        return Ok(ok(result).into_response());
    }

    let sync_type: SyncType = target.parse()?;
    let (run, outcome) = state
        .coordinator
        .import_type(sync_type, admin.actor())
        .await?;
    Ok(ok(RunReport { run, outcome }).into_response())
}

async fn export(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AdminIdentity>,
    Path(sync_type): Path<String>,
) -> Result<Response, AppError> {
    let sync_type: SyncType = sync_type.parse()?;
    let (run, outcome) = state
        .coordinator
        .export_type(sync_type, admin.actor())
        .await?;
    Ok(ok(RunReport { run, outcome }).into_response())
}

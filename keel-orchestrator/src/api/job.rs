//! Job API Handlers
//!
//! Execution context and completion for claimed jobs.

use axum::{
    Json,
    extract::{Path, State},
};
use keel_core::domain::Job;
use keel_core::dto::job::{FinishJob, JobContext};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::job_service;

/// GET /jobs/{id}/context
/// Workspace mapping and environment for a job's sandbox
pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<JobContext>> {
    tracing::debug!("Getting context for job: {}", id);

    let context =
        job_service::context(state.store.as_ref(), &state.config.workspace_dir, id).await?;

    Ok(Json(context))
}

/// POST /jobs/{id}/finish
/// Record a job's final status and exit code
pub async fn finish(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<FinishJob>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Finishing job: {} with status {}", id, req.status);

    let job = job_service::finish(state.store.as_ref(), id, req).await?;
    if let Err(e) = state.logs.close(id).await {
        tracing::warn!(job_id = id, "Failed to write held log output: {}", e);
    }

    Ok(Json(job))
}

//! Run API Handlers
//!
//! Triggering, inspecting, cancelling and deploying runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use keel_core::domain::{Job, Run};
use keel_core::dto::run::{RunDetail, TriggerRun};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::run_service;

/// POST /pipelines/{id}/run
/// Trigger a new run of a pipeline. The body is optional.
pub async fn trigger(
    State(state): State<AppState>,
    Path(pipeline_id): Path<i64>,
    req: Option<Json<TriggerRun>>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    tracing::info!("Triggering run for pipeline: {}", pipeline_id);

    let req = req.map(|Json(req)| req).unwrap_or_default();
    let run = run_service::trigger(
        state.store.as_ref(),
        state.config.strict_definitions,
        pipeline_id,
        req,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /runs/{id}
/// Run with its jobs, per-status counts and aggregated status
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RunDetail>> {
    tracing::debug!("Getting run: {}", id);

    let detail = run_service::get_run_detail(state.store.as_ref(), id).await?;

    Ok(Json(detail))
}

/// GET /runs/{id}/jobs
/// Jobs of a run ordered by step index
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs for run: {}", id);

    let jobs = run_service::list_jobs(state.store.as_ref(), id).await?;

    Ok(Json(jobs))
}

/// POST /runs/{id}/cancel
/// Cancel a run and its unfinished jobs
pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Run>> {
    tracing::info!("Cancelling run: {}", id);

    let run = run_service::cancel(state.store.as_ref(), id).await?;

    Ok(Json(run))
}

/// POST /runs/{id}/deploy
/// Append a deploy job to the run
pub async fn deploy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Queueing deploy for run: {}", id);

    let job = run_service::deploy(state.store.as_ref(), id).await?;

    Ok((StatusCode::CREATED, Json(job)))
}

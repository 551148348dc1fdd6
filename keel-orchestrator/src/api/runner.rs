//! Runner API Handlers
//!
//! Agent-facing endpoints for heartbeats and job claiming.

use axum::{Json, extract::State};
use keel_core::domain::{Job, Runner};
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::runner_service;

// =============================================================================
// Agent Endpoints
// =============================================================================

/// POST /runners/heartbeat
/// Register or refresh a runner
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<Runner>> {
    tracing::debug!("Heartbeat from runner: {}", req.name);

    let runner = runner_service::heartbeat(state.store.as_ref(), req).await?;

    Ok(Json(runner))
}

/// POST /runners/claim
/// Claim the oldest queued job. Responds with `null` when nothing is queued.
pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<Option<Job>>> {
    let job = runner_service::claim(state.store.as_ref(), req).await?;

    Ok(Json(job))
}

// =============================================================================
// Query Endpoints
// =============================================================================

/// GET /runners
/// List all known runners
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<Runner>>> {
    tracing::debug!("Listing runners");

    let runners = runner_service::list_runners(state.store.as_ref()).await?;

    Ok(Json(runners))
}

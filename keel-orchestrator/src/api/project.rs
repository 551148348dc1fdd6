//! Project API Handlers
//!
//! HTTP endpoints for projects and pipeline definitions.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use keel_core::domain::{Pipeline, Project};
use keel_core::dto::project::{CreatePipeline, CreateProject};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::project_service;

// =============================================================================
// Projects
// =============================================================================

/// POST /projects
/// Create a new project
pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    tracing::info!("Creating project: {}", req.name);

    let project = project_service::create_project(state.store.as_ref(), req).await?;

    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects/{id}
/// Get project by ID
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Project>> {
    tracing::debug!("Getting project: {}", id);

    let project = project_service::get_project(state.store.as_ref(), id).await?;

    Ok(Json(project))
}

// =============================================================================
// Pipelines
// =============================================================================

/// POST /projects/{id}/pipelines
/// Store a pipeline definition under a project
pub async fn create_pipeline(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline {} for project {}", req.name, project_id);

    let pipeline = project_service::create_pipeline(state.store.as_ref(), project_id, req).await?;

    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipelines/{id}
/// Get pipeline by ID
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = project_service::get_pipeline(state.store.as_ref(), id).await?;

    Ok(Json(pipeline))
}

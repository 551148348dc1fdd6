//! Project Service
//!
//! Business logic for projects and their pipeline definitions.

use keel_core::definition::PipelineDefinition;
use keel_core::domain::{Pipeline, Project};
use keel_core::dto::project::{CreatePipeline, CreateProject};

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project {0} not found")]
    NotFound(i64),

    #[error("Pipeline {0} not found")]
    PipelineNotFound(i64),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ProjectError>;

const MAX_NAME_LENGTH: usize = 255;

/// Create a new project
///
/// An explicit run mode must come with the setting it needs.
pub async fn create_project(store: &dyn Store, req: CreateProject) -> Result<Project> {
    validate_name(&req.name)?;

    if req.execution.run_mode.is_some() {
        req.execution
            .resolve_driver()
            .map_err(|e| ProjectError::ValidationError(e.to_string()))?;
    }

    let project = store.create_project(req).await?;
    tracing::info!("Project created: {} ({})", project.name, project.id);

    Ok(project)
}

/// Get a project by ID
pub async fn get_project(store: &dyn Store, id: i64) -> Result<Project> {
    store.find_project(id).await?.ok_or(ProjectError::NotFound(id))
}

/// Store a pipeline definition under a project
///
/// Definitions that do not parse are accepted and logged; triggering them
/// decides what happens next.
pub async fn create_pipeline(
    store: &dyn Store,
    project_id: i64,
    req: CreatePipeline,
) -> Result<Pipeline> {
    validate_name(&req.name)?;

    if req.yaml.trim().is_empty() {
        return Err(ProjectError::ValidationError(
            "Pipeline yaml cannot be empty".to_string(),
        ));
    }

    if let Err(e) = PipelineDefinition::from_yaml(&req.yaml) {
        tracing::warn!(project_id, "Pipeline '{}' does not parse: {}", req.name, e);
    }

    let pipeline = store
        .create_pipeline(project_id, req)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => ProjectError::NotFound(project_id),
            other => other.into(),
        })?;

    tracing::info!(
        project_id,
        "Pipeline created: {} ({})",
        pipeline.name,
        pipeline.id
    );

    Ok(pipeline)
}

/// Get a pipeline by ID
pub async fn get_pipeline(store: &dyn Store, id: i64) -> Result<Pipeline> {
    store
        .find_pipeline(id)
        .await?
        .ok_or(ProjectError::PipelineNotFound(id))
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ProjectError::ValidationError(
            "name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(ProjectError::ValidationError(format!(
            "name too long (max: {} chars)",
            MAX_NAME_LENGTH
        )));
    }

    Ok(())
}

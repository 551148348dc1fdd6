//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::{job_service, log_service, project_service, run_service, runner_service};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::InvalidState(msg) => ApiError::Conflict(msg),
            StoreError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<run_service::RunError> for ApiError {
    fn from(err: run_service::RunError) -> Self {
        use run_service::RunError;
        match err {
            RunError::NotFound(_) | RunError::PipelineNotFound(_) | RunError::ProjectNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            RunError::ValidationError(msg) => ApiError::BadRequest(msg),
            RunError::Store(err) => err.into(),
        }
    }
}

impl From<job_service::JobError> for ApiError {
    fn from(err: job_service::JobError) -> Self {
        use job_service::JobError;
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::InvalidState(msg) => ApiError::Conflict(msg),
            JobError::ValidationError(msg) => ApiError::BadRequest(msg),
            JobError::Store(err) => err.into(),
        }
    }
}

impl From<runner_service::RunnerError> for ApiError {
    fn from(err: runner_service::RunnerError) -> Self {
        use runner_service::RunnerError;
        match err {
            RunnerError::ValidationError(msg) => ApiError::BadRequest(msg),
            RunnerError::Store(err) => err.into(),
        }
    }
}

impl From<log_service::LogError> for ApiError {
    fn from(err: log_service::LogError) -> Self {
        use log_service::LogError;
        match err {
            LogError::JobNotFound(_) => ApiError::NotFound(err.to_string()),
            LogError::ValidationError(msg) => ApiError::BadRequest(msg),
            LogError::Io(err) => ApiError::InternalError(format!("log storage error: {}", err)),
            LogError::Store(err) => err.into(),
        }
    }
}

impl From<project_service::ProjectError> for ApiError {
    fn from(err: project_service::ProjectError) -> Self {
        use project_service::ProjectError;
        match err {
            ProjectError::NotFound(_) | ProjectError::PipelineNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            ProjectError::ValidationError(msg) => ApiError::BadRequest(msg),
            ProjectError::Store(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

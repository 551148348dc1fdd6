//! Health and metrics handlers

use axum::{extract::State, http::StatusCode, http::header, response::IntoResponse};
use std::fmt::Write;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics
/// Job counts by status in Prometheus text format
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let counts = state.store.count_jobs_by_status().await?;

    let mut body = String::from("# TYPE keel_up gauge\nkeel_up 1\n# TYPE keel_jobs gauge\n");
    for (status, count) in counts {
        let _ = writeln!(body, "keel_jobs{{status=\"{}\"}} {}", status, count);
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

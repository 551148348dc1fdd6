//! Runner Service
//!
//! Heartbeat bookkeeping and job claiming for execution agents.

use keel_core::domain::{Job, Runner};
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

const MAX_NAME_LENGTH: usize = 150;

/// Record a heartbeat, creating the runner on first contact
pub async fn heartbeat(store: &dyn Store, req: HeartbeatRequest) -> Result<Runner> {
    validate_name(&req.name)?;

    let runner = store.upsert_runner(&req).await?;
    tracing::debug!(runner = %runner.name, "Heartbeat received");

    Ok(runner)
}

/// Hand the oldest queued job to the calling runner, if any
pub async fn claim(store: &dyn Store, req: ClaimRequest) -> Result<Option<Job>> {
    validate_name(&req.name)?;

    let job = store.claim_next_job(&req).await?;
    match &job {
        Some(job) => tracing::info!(
            runner = %req.name,
            job_id = job.id,
            run_id = job.run_id,
            "Job claimed"
        ),
        None => tracing::debug!(runner = %req.name, "No queued job to claim"),
    }

    Ok(job)
}

/// List all known runners
pub async fn list_runners(store: &dyn Store) -> Result<Vec<Runner>> {
    Ok(store.list_runners().await?)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RunnerError::ValidationError("name is required".to_string()));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(RunnerError::ValidationError(format!(
            "name too long (max: {} chars)",
            MAX_NAME_LENGTH
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("runner-abc123").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(151)).is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_defaults() {
        let store = MemoryStore::new();
        let runner = heartbeat(
            &store,
            HeartbeatRequest {
                name: "r1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(runner.max_concurrency, 1);
        assert_eq!(runner.current_running, 0);
        assert_eq!(runner.status.as_str(), "online");
    }

    #[tokio::test]
    async fn test_claim_requires_name() {
        let store = MemoryStore::new();
        let result = claim(&store, ClaimRequest::default()).await;
        assert!(matches!(result, Err(RunnerError::ValidationError(_))));
    }
}

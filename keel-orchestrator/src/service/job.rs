//! Job Service
//!
//! Business logic for job completion and execution context.

use keel_core::domain::Job;
use keel_core::dto::job::{FinishJob, JobContext};
use std::path::Path;

use crate::repository::{Store, StoreError};

/// Mount point of the project workspace inside every sandbox
pub const WORKDIR_IN_CONTAINER: &str = "/workspace";

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Get a job by ID
pub async fn get_job(store: &dyn Store, id: i64) -> Result<Job> {
    store.find_job(id).await?.ok_or(JobError::NotFound(id))
}

/// Record a job's terminal status and re-aggregate its run
///
/// Finishing an already finished job is a no-op that returns the stored job.
pub async fn finish(store: &dyn Store, id: i64, req: FinishJob) -> Result<Job> {
    validate_finish(&req)?;

    let job = store.finish_job(id, &req).await.map_err(|e| match e {
        StoreError::NotFound(_) => JobError::NotFound(id),
        StoreError::InvalidState(msg) => JobError::InvalidState(msg),
        other => other.into(),
    })?;

    if job.status == req.status {
        tracing::info!(job_id = id, exit_code = ?job.exit_code, "Job finished: {}", job.status);
    } else {
        tracing::debug!(
            job_id = id,
            "Ignoring finish({}) for job already {}",
            req.status,
            job.status
        );
    }

    Ok(job)
}

/// Build the sandbox context for a job: workspace mapping and environment
pub async fn context(store: &dyn Store, workspace_dir: &Path, id: i64) -> Result<JobContext> {
    let job = get_job(store, id).await?;
    let run = store
        .find_run(job.run_id)
        .await?
        .ok_or_else(|| JobError::InvalidState(format!("Run {} of job {} is gone", job.run_id, id)))?;
    let pipeline = store.find_pipeline(run.pipeline_id).await?.ok_or_else(|| {
        JobError::InvalidState(format!("Pipeline {} of job {} is gone", run.pipeline_id, id))
    })?;
    let project = store.find_project(pipeline.project_id).await?;

    let mut env_vars: Vec<String> = project
        .as_ref()
        .map(|p| p.env_vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect())
        .unwrap_or_default();

    env_vars.push(format!("KEEL_JOB_ID={}", job.id));
    env_vars.push(format!("KEEL_RUN_ID={}", run.id));
    env_vars.push(format!("KEEL_PIPELINE_ID={}", pipeline.id));
    if let Some(sha) = &run.commit_sha {
        env_vars.push(format!("KEEL_COMMIT_SHA={}", sha));
    }
    if let Some(git_ref) = &run.git_ref {
        env_vars.push(format!("KEEL_REF={}", git_ref));
    }

    let workdir_host = workspace_dir.join(format!("project_{}", pipeline.project_id));
    let workdir_host = std::path::absolute(&workdir_host).map_err(|e| {
        JobError::InvalidState(format!("Cannot resolve workspace for job {}: {}", id, e))
    })?;

    Ok(JobContext {
        workdir_host: workdir_host.to_string_lossy().into_owned(),
        workdir_in_container: WORKDIR_IN_CONTAINER.to_string(),
        env_vars,
    })
}

// =============================================================================
// Validation
// =============================================================================

fn validate_finish(req: &FinishJob) -> Result<()> {
    if !req.status.is_terminal() {
        return Err(JobError::ValidationError(format!(
            "finish status must be success, failed or canceled (got {})",
            req.status
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use crate::service::{run_service, runner_service};
    use keel_core::domain::{RunnerStatus, Status};
    use keel_core::dto::project::{CreatePipeline, CreateProject};
    use keel_core::dto::run::TriggerRun;
    use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};
    use std::collections::BTreeMap;

    async fn triggered_run(store: &MemoryStore, yaml: &str) -> keel_core::domain::Run {
        let project = store
            .create_project(CreateProject {
                name: "demo".to_string(),
                env_vars: BTreeMap::from([("API_KEY".to_string(), "secret".to_string())]),
                ..Default::default()
            })
            .await
            .unwrap();
        let pipeline = store
            .create_pipeline(
                project.id,
                CreatePipeline {
                    name: "ci".to_string(),
                    yaml: yaml.to_string(),
                    version: None,
                },
            )
            .await
            .unwrap();
        run_service::trigger(
            store,
            false,
            pipeline.id,
            TriggerRun {
                commit_sha: Some("deadbeef".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    fn claim(name: &str) -> ClaimRequest {
        ClaimRequest {
            name: name.to_string(),
            labels: None,
        }
    }

    #[tokio::test]
    async fn test_trigger_claim_finish_end_to_end() {
        let store = MemoryStore::new();
        let run = triggered_run(
            &store,
            "version: 1\nname: e2e\nstages:\n  - name: build\n    steps:\n      - run: echo ok\n",
        )
        .await;

        let jobs = run_service::list_jobs(&store, run.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, Status::Queued);
        assert_eq!(jobs[0].step_index, 0);

        runner_service::heartbeat(
            &store,
            HeartbeatRequest {
                name: "r1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let claimed = runner_service::claim(&store, claim("r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, jobs[0].id);
        let detail = run_service::get_run_detail(&store, run.id).await.unwrap();
        assert_eq!(detail.run.status, Status::Running);

        finish(&store, claimed.id, FinishJob::from_exit_code(0))
            .await
            .unwrap();

        let detail = run_service::get_run_detail(&store, run.id).await.unwrap();
        assert_eq!(detail.run.status, Status::Success);
        assert!(detail.run.finished_at.is_some());
        assert_eq!(detail.jobs[0].exit_code, Some(0));

        let runners = runner_service::list_runners(&store).await.unwrap();
        assert_eq!(runners[0].status, RunnerStatus::Online);
    }

    #[tokio::test]
    async fn test_finish_rejects_non_terminal_status() {
        let store = MemoryStore::new();
        let req = FinishJob {
            status: Status::Running,
            exit_code: None,
            logs_location: None,
            artifacts_location: None,
        };
        let result = finish(&store, 1, req).await;
        assert!(matches!(result, Err(JobError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_finish_unknown_job() {
        let store = MemoryStore::new();
        let result = finish(&store, 77, FinishJob::failed()).await;
        assert!(matches!(result, Err(JobError::NotFound(77))));
    }

    #[tokio::test]
    async fn test_second_finish_keeps_run_status() {
        let store = MemoryStore::new();
        let run = triggered_run(
            &store,
            "stages:\n  - name: b\n    steps:\n      - run: a\n      - run: b\n",
        )
        .await;

        let first = runner_service::claim(&store, claim("r1"))
            .await
            .unwrap()
            .unwrap();
        finish(&store, first.id, FinishJob::from_exit_code(0))
            .await
            .unwrap();
        finish(&store, first.id, FinishJob::from_exit_code(0))
            .await
            .unwrap();

        let detail = run_service::get_run_detail(&store, run.id).await.unwrap();
        assert_eq!(detail.run.status, Status::Running);
        assert_eq!(detail.counts.success, 1);
        assert_eq!(detail.counts.queued, 1);
    }

    #[tokio::test]
    async fn test_context_maps_workspace_and_env() {
        let store = MemoryStore::new();
        let run = triggered_run(&store, "stages:\n  - name: b\n    steps:\n      - run: a\n").await;
        let job = run_service::list_jobs(&store, run.id).await.unwrap().remove(0);

        let ctx = context(&store, Path::new("/srv/keel"), job.id).await.unwrap();
        let pipeline = store
            .find_pipeline(run.pipeline_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            ctx.workdir_host,
            format!("/srv/keel/project_{}", pipeline.project_id)
        );
        assert!(Path::new(&ctx.workdir_host).is_absolute());
        assert_eq!(ctx.workdir_in_container, "/workspace");
        assert!(ctx.env_vars.contains(&"API_KEY=secret".to_string()));
        assert!(ctx.env_vars.contains(&format!("KEEL_JOB_ID={}", job.id)));
        assert!(ctx.env_vars.contains(&"KEEL_COMMIT_SHA=deadbeef".to_string()));
    }

    #[tokio::test]
    async fn test_context_workdir_is_absolute_for_relative_root() {
        let store = MemoryStore::new();
        let run = triggered_run(&store, "stages:\n  - name: b\n    steps:\n      - run: a\n").await;
        let job = run_service::list_jobs(&store, run.id).await.unwrap().remove(0);

        let ctx = context(&store, Path::new("./workspace"), job.id).await.unwrap();
        let host = Path::new(&ctx.workdir_host);

        assert!(host.is_absolute(), "{} is relative", ctx.workdir_host);
        assert!(host.starts_with(std::env::current_dir().unwrap()));
        assert!(ctx.workdir_host.contains("workspace/project_"));
    }
}

//! Run Service
//!
//! Triggering runs, inspecting them, cancellation and deploy follow-ups.

use keel_core::domain::{Job, NewJob, Run};
use keel_core::dto::run::{RunDetail, TriggerRun};

use crate::repository::{Store, StoreError};

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Run {0} not found")]
    NotFound(i64),

    #[error("Pipeline {0} not found")]
    PipelineNotFound(i64),

    #[error("Project {0} not found")]
    ProjectNotFound(i64),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunError>;

/// Create a queued run with one queued job per resolved step.
///
/// An unparsable definition still produces a run (with no jobs) unless
/// `strict` is set, in which case the trigger is rejected.
pub async fn trigger(
    store: &dyn Store,
    strict: bool,
    pipeline_id: i64,
    req: TriggerRun,
) -> Result<Run> {
    let pipeline = store
        .find_pipeline(pipeline_id)
        .await?
        .ok_or(RunError::PipelineNotFound(pipeline_id))?;

    let jobs: Vec<NewJob> = match pipeline.definition() {
        Ok(definition) => definition.resolve().into_iter().map(NewJob::from).collect(),
        Err(e) if strict => return Err(RunError::ValidationError(e.to_string())),
        Err(e) => {
            tracing::warn!(
                pipeline_id,
                "Pipeline definition could not be parsed, creating run without jobs: {}",
                e
            );
            Vec::new()
        }
    };

    let job_count = jobs.len();
    let run = store.create_run(pipeline.id, &req, jobs).await.map_err(|e| match e {
        StoreError::NotFound(_) => RunError::PipelineNotFound(pipeline_id),
        other => other.into(),
    })?;

    tracing::info!(
        run_id = run.id,
        pipeline_id,
        "Run created with {} job(s)",
        job_count
    );

    Ok(run)
}

/// Get a run with its jobs, counts and aggregated status
pub async fn get_run_detail(store: &dyn Store, id: i64) -> Result<RunDetail> {
    let run = store.find_run(id).await?.ok_or(RunError::NotFound(id))?;
    let jobs = store.list_run_jobs(id).await?;

    Ok(RunDetail::new(run, jobs))
}

/// List a run's jobs ordered by step index
pub async fn list_jobs(store: &dyn Store, run_id: i64) -> Result<Vec<Job>> {
    store
        .find_run(run_id)
        .await?
        .ok_or(RunError::NotFound(run_id))?;

    Ok(store.list_run_jobs(run_id).await?)
}

/// Cancel a run and all of its unfinished jobs
///
/// Only control-plane state changes. Sandboxes already executing are not
/// interrupted; their late finish reports are ignored.
pub async fn cancel(store: &dyn Store, id: i64) -> Result<Run> {
    let run = store.cancel_run(id).await.map_err(|e| match e {
        StoreError::NotFound(_) => RunError::NotFound(id),
        other => other.into(),
    })?;

    tracing::info!(run_id = id, "Run cancel requested, status is now {}", run.status);

    Ok(run)
}

/// Append a deploy job to an existing run
///
/// The driver comes from the owning project's execution config. The run's
/// outcome is not checked here.
pub async fn deploy(store: &dyn Store, run_id: i64) -> Result<Job> {
    let run = store
        .find_run(run_id)
        .await?
        .ok_or(RunError::NotFound(run_id))?;
    let pipeline = store
        .find_pipeline(run.pipeline_id)
        .await?
        .ok_or(RunError::PipelineNotFound(run.pipeline_id))?;
    let project = store
        .find_project(pipeline.project_id)
        .await?
        .ok_or(RunError::ProjectNotFound(pipeline.project_id))?;

    let driver = project
        .execution
        .resolve_driver()
        .map_err(|e| RunError::ValidationError(e.to_string()))?;

    let job = store.append_job(run_id, driver.to_job()).await?;

    tracing::info!(
        run_id,
        job_id = job.id,
        "Deploy job queued using the {} driver",
        driver.name()
    );

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use keel_core::domain::{ExecutionConfig, JobKind, RunMode, Status};
    use keel_core::dto::project::{CreatePipeline, CreateProject};

    const ONE_STEP: &str = "version: 1\nname: demo\nstages:\n  - name: build\n    steps:\n      - run: echo hi\n";

    async fn pipeline_with(store: &MemoryStore, yaml: &str, execution: ExecutionConfig) -> i64 {
        let project = store
            .create_project(CreateProject {
                name: "demo".to_string(),
                execution,
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_pipeline(
                project.id,
                CreatePipeline {
                    name: "ci".to_string(),
                    yaml: yaml.to_string(),
                    version: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_trigger_creates_queued_jobs() {
        let store = MemoryStore::new();
        let pipeline_id = pipeline_with(&store, ONE_STEP, ExecutionConfig::default()).await;

        let run = trigger(&store, false, pipeline_id, TriggerRun::default())
            .await
            .unwrap();
        assert_eq!(run.status, Status::Queued);

        let detail = get_run_detail(&store, run.id).await.unwrap();
        assert_eq!(detail.jobs.len(), 1);
        assert_eq!(detail.jobs[0].step_index, 0);
        assert_eq!(detail.jobs[0].command, "echo hi");
        assert_eq!(detail.counts.queued, 1);
        assert_eq!(detail.aggregated_status, Status::Running);
    }

    #[tokio::test]
    async fn test_trigger_unknown_pipeline() {
        let store = MemoryStore::new();
        let result = trigger(&store, false, 99, TriggerRun::default()).await;
        assert!(matches!(result, Err(RunError::PipelineNotFound(99))));
    }

    #[tokio::test]
    async fn test_invalid_definition_still_creates_run() {
        let store = MemoryStore::new();
        let pipeline_id = pipeline_with(&store, "stages: {{ nope", ExecutionConfig::default()).await;

        let run = trigger(&store, false, pipeline_id, TriggerRun::default())
            .await
            .unwrap();
        let detail = get_run_detail(&store, run.id).await.unwrap();
        assert!(detail.jobs.is_empty());
        assert_eq!(detail.aggregated_status, Status::Queued);
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_invalid_definition() {
        let store = MemoryStore::new();
        let pipeline_id = pipeline_with(&store, "stages: {{ nope", ExecutionConfig::default()).await;

        let result = trigger(&store, true, pipeline_id, TriggerRun::default()).await;
        assert!(matches!(result, Err(RunError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_trigger_records_metadata() {
        let store = MemoryStore::new();
        let pipeline_id = pipeline_with(&store, ONE_STEP, ExecutionConfig::default()).await;

        let run = trigger(
            &store,
            false,
            pipeline_id,
            TriggerRun {
                commit_sha: Some("abc123".to_string()),
                git_ref: Some("main".to_string()),
                triggered_by: Some("alice".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(run.commit_sha.as_deref(), Some("abc123"));
        assert_eq!(run.git_ref.as_deref(), Some("main"));
        assert_eq!(run.triggered_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_deploy_appends_job_after_last_step() {
        let store = MemoryStore::new();
        let execution = ExecutionConfig {
            run_mode: Some(RunMode::Command),
            start_command: Some("./serve".to_string()),
            ..Default::default()
        };
        let pipeline_id = pipeline_with(&store, ONE_STEP, execution).await;
        let run = trigger(&store, false, pipeline_id, TriggerRun::default())
            .await
            .unwrap();

        let job = deploy(&store, run.id).await.unwrap();
        assert_eq!(job.stage, "Deploy");
        assert_eq!(job.name, "deploy");
        assert_eq!(job.step_index, 1);
        assert_eq!(job.command, "keel-deploy:command:./serve");
        assert_eq!(job.kind, JobKind::Deploy);
    }

    #[tokio::test]
    async fn test_step_cannot_smuggle_deploy_command() {
        let store = MemoryStore::new();
        let yaml = "stages:\n  - name: build\n    steps:\n      - run: \"keel-deploy:command:docker ps\"\n";
        let pipeline_id = pipeline_with(&store, yaml, ExecutionConfig::default()).await;

        let result = trigger(&store, true, pipeline_id, TriggerRun::default()).await;
        assert!(matches!(result, Err(RunError::ValidationError(_))));

        let run = trigger(&store, false, pipeline_id, TriggerRun::default())
            .await
            .unwrap();
        assert!(get_run_detail(&store, run.id).await.unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn test_deploy_rejects_incomplete_command_mode() {
        let store = MemoryStore::new();
        let execution = ExecutionConfig {
            run_mode: Some(RunMode::Command),
            ..Default::default()
        };
        let pipeline_id = pipeline_with(&store, ONE_STEP, execution).await;
        let run = trigger(&store, false, pipeline_id, TriggerRun::default())
            .await
            .unwrap();

        let result = deploy(&store, run.id).await;
        assert!(matches!(result, Err(RunError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let store = MemoryStore::new();
        assert!(matches!(cancel(&store, 5).await, Err(RunError::NotFound(5))));
    }

    #[tokio::test]
    async fn test_list_jobs_unknown_run() {
        let store = MemoryStore::new();
        assert!(matches!(list_jobs(&store, 5).await, Err(RunError::NotFound(5))));
    }
}

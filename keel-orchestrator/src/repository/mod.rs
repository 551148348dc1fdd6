//! Repository Module
//!
//! Data access layer for the orchestrator.
//!
//! All persistence goes through the [`Store`] trait so services can run
//! against PostgreSQL in production and an in-memory store in tests and
//! local development. Every method that mutates more than one row is a
//! single atomic unit in both implementations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::{Job, NewJob, Pipeline, Project, Run, Runner, Status};
use keel_core::dto::job::FinishJob;
use keel_core::dto::project::{CreatePipeline, CreateProject};
use keel_core::dto::run::TriggerRun;
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

/// Repository error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one lease-reaper pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Jobs moved from `running` back to `queued`
    pub requeued_jobs: Vec<i64>,
    /// Runners marked `offline`
    pub offline_runners: Vec<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Projects & pipelines
    // =========================================================================

    async fn create_project(&self, req: CreateProject) -> StoreResult<Project>;

    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>>;

    /// Fails with `NotFound` when the project does not exist
    async fn create_pipeline(&self, project_id: i64, req: CreatePipeline)
    -> StoreResult<Pipeline>;

    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>>;

    // =========================================================================
    // Runs
    // =========================================================================

    /// Insert a queued run and its queued jobs in one transaction.
    ///
    /// Jobs get `step_index` 0..n in the given order.
    async fn create_run(
        &self,
        pipeline_id: i64,
        trigger: &TriggerRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<Run>;

    async fn find_run(&self, id: i64) -> StoreResult<Option<Run>>;

    /// Jobs of a run ordered by `step_index`
    async fn list_run_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>>;

    /// Cancel every queued or running job of the run and the run itself.
    ///
    /// Terminal runs are returned unchanged. Runners that lose a job get
    /// their running count recomputed.
    async fn cancel_run(&self, run_id: i64) -> StoreResult<Run>;

    /// Append a queued job after the run's last `step_index`
    async fn append_job(&self, run_id: i64, job: NewJob) -> StoreResult<Job>;

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>>;

    /// Record a job's terminal status and re-aggregate its run.
    ///
    /// A job that is already terminal is returned unchanged. A queued job
    /// yields `InvalidState`.
    async fn finish_job(&self, id: i64, report: &FinishJob) -> StoreResult<Job>;

    /// Set the job's log location if it has none yet
    async fn set_logs_location(&self, id: i64, location: &str) -> StoreResult<()>;

    async fn count_jobs_by_status(&self) -> StoreResult<Vec<(Status, i64)>>;

    // =========================================================================
    // Runners
    // =========================================================================

    /// Upsert a runner by name and mark it online
    async fn upsert_runner(&self, req: &HeartbeatRequest) -> StoreResult<Runner>;

    /// Atomically hand the oldest queued job to the calling runner.
    ///
    /// No two concurrent callers ever receive the same job.
    async fn claim_next_job(&self, req: &ClaimRequest) -> StoreResult<Option<Job>>;

    async fn list_runners(&self) -> StoreResult<Vec<Runner>>;

    /// Requeue running jobs of runners silent since `cutoff` and mark those runners offline
    async fn reap_stale_runners(&self, cutoff: DateTime<Utc>) -> StoreResult<ReapReport>;
}

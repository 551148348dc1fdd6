//! PostgreSQL store
//!
//! Every multi-row mutation runs in one transaction. Row locks are always
//! taken on jobs before their run so concurrent claim, finish and cancel
//! calls cannot deadlock on each other.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::{Job, NewJob, Pipeline, Project, Run, Runner, RunnerStatus, Status};
use keel_core::dto::job::FinishJob;
use keel_core::dto::project::{CreatePipeline, CreateProject};
use keel_core::dto::run::TriggerRun;
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;

use self::rows::{
    JobRow, PipelineRow, ProjectRow, RunRow, RunnerRow, job_columns, run_columns, runner_columns,
};
use super::{ReapReport, Store, StoreError, StoreResult};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn insert_job(
    conn: &mut PgConnection,
    run_id: i64,
    step_index: i32,
    job: NewJob,
    now: DateTime<Utc>,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(concat!(
        "INSERT INTO jobs (run_id, stage, step_index, name, kind, status, image, command, created_at) \
         VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7, $8) RETURNING ",
        job_columns!()
    ))
    .bind(run_id)
    .bind(job.stage)
    .bind(step_index)
    .bind(job.name)
    .bind(job.kind.as_str())
    .bind(job.image)
    .bind(job.command)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(row.into())
}

/// Set a runner's running count from its `running` jobs
async fn recount_runner(conn: &mut PgConnection, runner_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE runners
        SET current_running = counted.n,
            status = CASE WHEN counted.n > 0 THEN 'busy' ELSE 'online' END
        FROM (
            SELECT COUNT(*)::INT AS n FROM jobs WHERE runner_id = $1 AND status = 'running'
        ) AS counted
        WHERE runners.id = $1
        "#,
    )
    .bind(runner_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Re-derive a run's status from its jobs. The run row is locked after the job rows.
async fn reaggregate_run(
    conn: &mut PgConnection,
    run_id: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let Some(row) = sqlx::query_as::<_, RunRow>(concat!(
        "SELECT ",
        run_columns!(),
        " FROM runs WHERE id = $1 FOR UPDATE"
    ))
    .bind(run_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(());
    };

    let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE run_id = $1")
        .bind(run_id)
        .fetch_all(&mut *conn)
        .await?;
    let statuses: Vec<Status> = statuses.iter().filter_map(|s| s.parse().ok()).collect();

    let mut run: Run = row.into();
    if !run.apply_aggregate(&statuses, now) {
        return Ok(());
    }

    sqlx::query("UPDATE runs SET status = $1, started_at = $2, finished_at = $3 WHERE id = $4")
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.id)
        .execute(conn)
        .await?;

    Ok(())
}

async fn upsert_runner_as(
    conn: &mut PgConnection,
    name: &str,
    labels: Option<&BTreeMap<String, String>>,
    status: RunnerStatus,
    now: DateTime<Utc>,
) -> Result<Runner, sqlx::Error> {
    let row = sqlx::query_as::<_, RunnerRow>(concat!(
        "INSERT INTO runners (name, labels, status, last_heartbeat_at) \
         VALUES ($1, COALESCE($2, '{}'::jsonb), $3, $4) \
         ON CONFLICT (name) DO UPDATE SET \
             labels = COALESCE($2, runners.labels), \
             status = EXCLUDED.status, \
             last_heartbeat_at = EXCLUDED.last_heartbeat_at \
         RETURNING ",
        runner_columns!()
    ))
    .bind(name)
    .bind(labels.map(Json))
    .bind(status.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(row.into())
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Projects & pipelines
    // =========================================================================

    async fn create_project(&self, req: CreateProject) -> StoreResult<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (name, execution, env_vars, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, execution, env_vars, created_at
            "#,
        )
        .bind(&req.name)
        .bind(Json(&req.execution))
        .bind(Json(&req.env_vars))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, execution, env_vars, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn create_pipeline(
        &self,
        project_id: i64,
        req: CreatePipeline,
    ) -> StoreResult<Pipeline> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            INSERT INTO pipelines (project_id, name, yaml, version, created_at)
            SELECT id, $2, $3, $4, $5 FROM projects WHERE id = $1
            RETURNING id, project_id, name, yaml, version, created_at
            "#,
        )
        .bind(project_id)
        .bind(&req.name)
        .bind(&req.yaml)
        .bind(req.version.unwrap_or(1))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("Project {}", project_id)))
    }

    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT id, project_id, name, yaml, version, created_at FROM pipelines WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    // =========================================================================
    // Runs
    // =========================================================================

    async fn create_run(
        &self,
        pipeline_id: i64,
        trigger: &TriggerRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<Run> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let run: Run = sqlx::query_as::<_, RunRow>(concat!(
            "INSERT INTO runs (pipeline_id, status, triggered_by, commit_sha, git_ref, queued_at) \
             SELECT id, 'queued', $2, $3, $4, $5 FROM pipelines WHERE id = $1 \
             RETURNING ",
            run_columns!()
        ))
        .bind(pipeline_id)
        .bind(&trigger.triggered_by)
        .bind(&trigger.commit_sha)
        .bind(&trigger.git_ref)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Pipeline {}", pipeline_id)))?
        .into();

        for (index, job) in jobs.into_iter().enumerate() {
            insert_job(&mut *tx, run.id, index as i32, job, now).await?;
        }

        tx.commit().await?;
        Ok(run)
    }

    async fn find_run(&self, id: i64) -> StoreResult<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(concat!(
            "SELECT ",
            run_columns!(),
            " FROM runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_run_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE run_id = $1 ORDER BY step_index ASC"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn cancel_run(&self, run_id: i64) -> StoreResult<Run> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let run: Run = sqlx::query_as::<_, RunRow>(concat!(
            "SELECT ",
            run_columns!(),
            " FROM runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?
        .into();

        if run.status.is_terminal() {
            tx.commit().await?;
            return Ok(run);
        }

        let runner_ids: Vec<Option<i64>> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'canceled', finished_at = $2
            WHERE run_id = $1 AND status IN ('queued', 'running')
            RETURNING runner_id
            "#,
        )
        .bind(run_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut affected: Vec<i64> = runner_ids.into_iter().flatten().collect();
        affected.sort_unstable();
        affected.dedup();
        for runner_id in affected {
            recount_runner(&mut *tx, runner_id).await?;
        }

        // A concurrent finish may have completed the run in the meantime
        sqlx::query(
            r#"
            UPDATE runs
            SET status = 'canceled', finished_at = $2
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(run_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, RunRow>(concat!(
            "SELECT ",
            run_columns!(),
            " FROM runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn append_job(&self, run_id: i64, job: NewJob) -> StoreResult<Job> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent appends to the same run
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM runs WHERE id = $1 FOR UPDATE")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("Run {}", run_id)));
        }

        let next_index: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(step_index) + 1, 0) FROM jobs WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        let job = insert_job(&mut *tx, run_id, next_index, job, Utc::now()).await?;
        tx.commit().await?;
        Ok(job)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn finish_job(&self, id: i64, report: &FinishJob) -> StoreResult<Job> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let current: Job = sqlx::query_as::<_, JobRow>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Job {}", id)))?
        .into();

        if current.status.is_terminal() {
            tx.commit().await?;
            return Ok(current);
        }
        if current.status == Status::Queued {
            return Err(StoreError::InvalidState(format!(
                "Job {} has not been claimed",
                id
            )));
        }

        let job: Job = sqlx::query_as::<_, JobRow>(concat!(
            "UPDATE jobs SET status = $2, exit_code = $3, \
             logs_location = COALESCE($4, logs_location), \
             artifacts_location = COALESCE($5, artifacts_location), \
             finished_at = $6 \
             WHERE id = $1 RETURNING ",
            job_columns!()
        ))
        .bind(id)
        .bind(report.status.as_str())
        .bind(report.exit_code)
        .bind(&report.logs_location)
        .bind(&report.artifacts_location)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?
        .into();

        reaggregate_run(&mut *tx, job.run_id, now).await?;
        if let Some(runner_id) = job.runner_id {
            recount_runner(&mut *tx, runner_id).await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn set_logs_location(&self, id: i64, location: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET logs_location = COALESCE(logs_location, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(location)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Job {}", id)));
        }
        Ok(())
    }

    async fn count_jobs_by_status(&self) -> StoreResult<Vec<(Status, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| status.parse().ok().map(|s| (s, count)))
            .collect())
    }

    // =========================================================================
    // Runners
    // =========================================================================

    async fn upsert_runner(&self, req: &HeartbeatRequest) -> StoreResult<Runner> {
        let row = sqlx::query_as::<_, RunnerRow>(concat!(
            "INSERT INTO runners (name, labels, max_concurrency, current_running, status, last_heartbeat_at) \
             VALUES ($1, COALESCE($2, '{}'::jsonb), $3, $4, 'online', $5) \
             ON CONFLICT (name) DO UPDATE SET \
                 labels = COALESCE($2, runners.labels), \
                 max_concurrency = EXCLUDED.max_concurrency, \
                 current_running = EXCLUDED.current_running, \
                 status = 'online', \
                 last_heartbeat_at = EXCLUDED.last_heartbeat_at \
             RETURNING ",
            runner_columns!()
        ))
        .bind(&req.name)
        .bind(req.labels.as_ref().map(Json))
        .bind(req.max_concurrency.unwrap_or(1))
        .bind(req.current_running.unwrap_or(0))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn claim_next_job(&self, req: &ClaimRequest) -> StoreResult<Option<Job>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let runner =
            upsert_runner_as(&mut *tx, &req.name, req.labels.as_ref(), RunnerStatus::Busy, now)
                .await?;

        // Rows locked by another claimer are skipped rather than waited on
        let candidate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE status = 'queued'
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = candidate else {
            recount_runner(&mut *tx, runner.id).await?;
            tx.commit().await?;
            return Ok(None);
        };

        let job: Job = sqlx::query_as::<_, JobRow>(concat!(
            "UPDATE jobs SET status = 'running', started_at = $2, runner_id = $3 \
             WHERE id = $1 RETURNING ",
            job_columns!()
        ))
        .bind(job_id)
        .bind(now)
        .bind(runner.id)
        .fetch_one(&mut *tx)
        .await?
        .into();

        sqlx::query(
            r#"
            UPDATE runs
            SET status = 'running', started_at = COALESCE(started_at, $2), finished_at = NULL
            WHERE id = $1 AND status <> 'running'
            "#,
        )
        .bind(job.run_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        recount_runner(&mut *tx, runner.id).await?;
        tx.commit().await?;

        Ok(Some(job))
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        let rows = sqlx::query_as::<_, RunnerRow>(concat!(
            "SELECT ",
            runner_columns!(),
            " FROM runners ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reap_stale_runners(&self, cutoff: DateTime<Utc>) -> StoreResult<ReapReport> {
        let mut tx = self.pool.begin().await?;

        let requeued_jobs: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'queued', runner_id = NULL, started_at = NULL
            WHERE status = 'running'
              AND runner_id IN (SELECT id FROM runners WHERE last_heartbeat_at < $1)
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let offline_runners: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE runners
            SET status = 'offline', current_running = 0
            WHERE last_heartbeat_at < $1 AND status <> 'offline'
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReapReport {
            requeued_jobs,
            offline_runners,
        })
    }
}

//! Row types and column lists for the PostgreSQL store

use chrono::{DateTime, Utc};
use keel_core::domain::{
    ExecutionConfig, Job, JobKind, Pipeline, Project, Run, Runner, RunnerStatus, Status,
};
use sqlx::types::Json;
use std::collections::BTreeMap;

macro_rules! job_columns {
    () => {
        "id, run_id, stage, step_index, name, kind, status, image, command, runner_id, exit_code, \
         logs_location, artifacts_location, created_at, started_at, finished_at"
    };
}

macro_rules! run_columns {
    () => {
        "id, pipeline_id, status, triggered_by, commit_sha, git_ref, queued_at, started_at, \
         finished_at"
    };
}

macro_rules! runner_columns {
    () => {
        "id, name, labels, max_concurrency, current_running, status, last_heartbeat_at"
    };
}

pub(super) use job_columns;
pub(super) use run_columns;
pub(super) use runner_columns;

// =============================================================================
// Status Conversion
// =============================================================================

fn string_to_status(s: &str) -> Status {
    s.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown status in database: {}", s);
        Status::Failed
    })
}

// Unknown kinds never get the deploy privileges
fn string_to_job_kind(s: &str) -> JobKind {
    JobKind::parse(s).unwrap_or_else(|| {
        tracing::warn!("Unknown job kind in database: {}", s);
        JobKind::Step
    })
}

fn string_to_runner_status(s: &str) -> RunnerStatus {
    RunnerStatus::parse(s).unwrap_or_else(|| {
        tracing::warn!("Unknown runner status in database: {}", s);
        RunnerStatus::Offline
    })
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
pub(super) struct ProjectRow {
    id: i64,
    name: String,
    execution: Json<ExecutionConfig>,
    env_vars: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            execution: row.execution.0,
            env_vars: row.env_vars.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct PipelineRow {
    id: i64,
    project_id: i64,
    name: String,
    yaml: String,
    version: i32,
    created_at: DateTime<Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            yaml: row.yaml,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct RunRow {
    id: i64,
    pipeline_id: i64,
    status: String,
    triggered_by: Option<String>,
    commit_sha: Option<String>,
    git_ref: Option<String>,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            pipeline_id: row.pipeline_id,
            status: string_to_status(&row.status),
            triggered_by: row.triggered_by,
            commit_sha: row.commit_sha,
            git_ref: row.git_ref,
            queued_at: row.queued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct JobRow {
    id: i64,
    run_id: i64,
    stage: String,
    step_index: i32,
    name: String,
    kind: String,
    status: String,
    image: Option<String>,
    command: String,
    runner_id: Option<i64>,
    exit_code: Option<i32>,
    logs_location: Option<String>,
    artifacts_location: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            run_id: row.run_id,
            stage: row.stage,
            step_index: row.step_index,
            name: row.name,
            kind: string_to_job_kind(&row.kind),
            status: string_to_status(&row.status),
            image: row.image,
            command: row.command,
            runner_id: row.runner_id,
            exit_code: row.exit_code,
            logs_location: row.logs_location,
            artifacts_location: row.artifacts_location,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct RunnerRow {
    id: i64,
    name: String,
    labels: Json<BTreeMap<String, String>>,
    max_concurrency: i32,
    current_running: i32,
    status: String,
    last_heartbeat_at: DateTime<Utc>,
}

impl From<RunnerRow> for Runner {
    fn from(row: RunnerRow) -> Self {
        Runner {
            id: row.id,
            name: row.name,
            labels: row.labels.0,
            max_concurrency: row.max_concurrency,
            current_running: row.current_running,
            status: string_to_runner_status(&row.status),
            last_heartbeat_at: row.last_heartbeat_at,
        }
    }
}

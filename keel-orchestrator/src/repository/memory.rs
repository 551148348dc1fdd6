//! In-memory store
//!
//! Keeps every table behind a single async mutex, so each trait method is
//! trivially atomic. Used by tests and by `KEEL_STORE=memory` for local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::domain::{
    Job, NewJob, Pipeline, Project, Run, Runner, RunnerStatus, Status,
};
use keel_core::dto::job::FinishJob;
use keel_core::dto::project::{CreatePipeline, CreateProject};
use keel_core::dto::run::TriggerRun;
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use super::{ReapReport, Store, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    projects: BTreeMap<i64, Project>,
    pipelines: BTreeMap<i64, Pipeline>,
    runs: BTreeMap<i64, Run>,
    jobs: BTreeMap<i64, Job>,
    runners: BTreeMap<i64, Runner>,
    last_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    /// Ids are shared across tables and strictly increasing
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert_job(&mut self, run_id: i64, step_index: i32, job: NewJob, now: DateTime<Utc>) -> Job {
        let job = Job {
            id: self.next_id(),
            run_id,
            stage: job.stage,
            step_index,
            name: job.name,
            kind: job.kind,
            status: Status::Queued,
            image: job.image,
            command: job.command,
            runner_id: None,
            exit_code: None,
            logs_location: None,
            artifacts_location: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };
        self.jobs.insert(job.id, job.clone());
        job
    }

    fn recount_runner(&mut self, runner_id: i64) {
        let running = self
            .jobs
            .values()
            .filter(|j| j.runner_id == Some(runner_id) && j.status == Status::Running)
            .count() as i64;

        if let Some(runner) = self.runners.get_mut(&runner_id) {
            runner.current_running = running as i32;
            runner.status = RunnerStatus::for_running_count(running);
        }
    }

    fn reaggregate(&mut self, run_id: i64, now: DateTime<Utc>) {
        let statuses: Vec<Status> = self
            .jobs
            .values()
            .filter(|j| j.run_id == run_id)
            .map(|j| j.status)
            .collect();

        if let Some(run) = self.runs.get_mut(&run_id) {
            run.apply_aggregate(&statuses, now);
        }
    }

    fn upsert_runner(
        &mut self,
        name: &str,
        labels: Option<&BTreeMap<String, String>>,
        status: RunnerStatus,
        now: DateTime<Utc>,
    ) -> &mut Runner {
        let existing = self.runners.values().find(|r| r.name == name).map(|r| r.id);
        let id = match existing {
            Some(id) => id,
            None => self.next_id(),
        };

        let runner = self.runners.entry(id).or_insert_with(|| Runner {
            id,
            name: name.to_string(),
            labels: BTreeMap::new(),
            max_concurrency: 1,
            current_running: 0,
            status,
            last_heartbeat_at: now,
        });
        if let Some(labels) = labels {
            runner.labels = labels.clone();
        }
        runner.status = status;
        runner.last_heartbeat_at = now;
        runner
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, req: CreateProject) -> StoreResult<Project> {
        let mut tables = self.inner.lock().await;
        let project = Project {
            id: tables.next_id(),
            name: req.name,
            execution: req.execution,
            env_vars: req.env_vars,
            created_at: Utc::now(),
        };
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn find_project(&self, id: i64) -> StoreResult<Option<Project>> {
        Ok(self.inner.lock().await.projects.get(&id).cloned())
    }

    async fn create_pipeline(
        &self,
        project_id: i64,
        req: CreatePipeline,
    ) -> StoreResult<Pipeline> {
        let mut tables = self.inner.lock().await;
        if !tables.projects.contains_key(&project_id) {
            return Err(StoreError::NotFound(format!("Project {}", project_id)));
        }
        let pipeline = Pipeline {
            id: tables.next_id(),
            project_id,
            name: req.name,
            yaml: req.yaml,
            version: req.version.unwrap_or(1),
            created_at: Utc::now(),
        };
        tables.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>> {
        Ok(self.inner.lock().await.pipelines.get(&id).cloned())
    }

    async fn create_run(
        &self,
        pipeline_id: i64,
        trigger: &TriggerRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<Run> {
        let mut tables = self.inner.lock().await;
        if !tables.pipelines.contains_key(&pipeline_id) {
            return Err(StoreError::NotFound(format!("Pipeline {}", pipeline_id)));
        }

        let now = Utc::now();
        let run = Run {
            id: tables.next_id(),
            pipeline_id,
            status: Status::Queued,
            triggered_by: trigger.triggered_by.clone(),
            commit_sha: trigger.commit_sha.clone(),
            git_ref: trigger.git_ref.clone(),
            queued_at: now,
            started_at: None,
            finished_at: None,
        };
        tables.runs.insert(run.id, run.clone());

        for (index, job) in jobs.into_iter().enumerate() {
            tables.insert_job(run.id, index as i32, job, now);
        }

        Ok(run)
    }

    async fn find_run(&self, id: i64) -> StoreResult<Option<Run>> {
        Ok(self.inner.lock().await.runs.get(&id).cloned())
    }

    async fn list_run_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>> {
        let tables = self.inner.lock().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|j| j.run_id == run_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.step_index);
        Ok(jobs)
    }

    async fn cancel_run(&self, run_id: i64) -> StoreResult<Run> {
        let mut tables = self.inner.lock().await;
        let run = tables
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;

        if run.status.is_terminal() {
            return Ok(run);
        }

        let now = Utc::now();
        let mut affected = HashSet::new();
        for job in tables.jobs.values_mut().filter(|j| j.run_id == run_id) {
            if !job.status.is_terminal() {
                job.status = Status::Canceled;
                job.finished_at = Some(now);
                if let Some(runner_id) = job.runner_id {
                    affected.insert(runner_id);
                }
            }
        }

        for runner_id in affected {
            tables.recount_runner(runner_id);
        }

        let run = tables
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| StoreError::NotFound(format!("Run {}", run_id)))?;
        run.cancel(now);
        Ok(run.clone())
    }

    async fn append_job(&self, run_id: i64, job: NewJob) -> StoreResult<Job> {
        let mut tables = self.inner.lock().await;
        if !tables.runs.contains_key(&run_id) {
            return Err(StoreError::NotFound(format!("Run {}", run_id)));
        }

        let next_index = tables
            .jobs
            .values()
            .filter(|j| j.run_id == run_id)
            .map(|j| j.step_index + 1)
            .max()
            .unwrap_or(0);

        Ok(tables.insert_job(run_id, next_index, job, Utc::now()))
    }

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn finish_job(&self, id: i64, report: &FinishJob) -> StoreResult<Job> {
        let mut tables = self.inner.lock().await;
        let now = Utc::now();

        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Job {}", id)))?;

        match job.status {
            status if status.is_terminal() => return Ok(job.clone()),
            Status::Queued => {
                return Err(StoreError::InvalidState(format!(
                    "Job {} has not been claimed",
                    id
                )));
            }
            _ => {}
        }

        job.status = report.status;
        job.exit_code = report.exit_code;
        if report.logs_location.is_some() {
            job.logs_location = report.logs_location.clone();
        }
        if report.artifacts_location.is_some() {
            job.artifacts_location = report.artifacts_location.clone();
        }
        job.finished_at = Some(now);
        let job = job.clone();

        tables.reaggregate(job.run_id, now);
        if let Some(runner_id) = job.runner_id {
            tables.recount_runner(runner_id);
        }

        Ok(job)
    }

    async fn set_logs_location(&self, id: i64, location: &str) -> StoreResult<()> {
        let mut tables = self.inner.lock().await;
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Job {}", id)))?;
        if job.logs_location.is_none() {
            job.logs_location = Some(location.to_string());
        }
        Ok(())
    }

    async fn count_jobs_by_status(&self) -> StoreResult<Vec<(Status, i64)>> {
        let tables = self.inner.lock().await;
        Ok(Status::ALL
            .iter()
            .map(|status| {
                let count = tables.jobs.values().filter(|j| j.status == *status).count();
                (*status, count as i64)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn upsert_runner(&self, req: &HeartbeatRequest) -> StoreResult<Runner> {
        let mut tables = self.inner.lock().await;
        let runner =
            tables.upsert_runner(&req.name, req.labels.as_ref(), RunnerStatus::Online, Utc::now());
        runner.max_concurrency = req.max_concurrency.unwrap_or(1);
        runner.current_running = req.current_running.unwrap_or(0);
        Ok(runner.clone())
    }

    async fn claim_next_job(&self, req: &ClaimRequest) -> StoreResult<Option<Job>> {
        let mut tables = self.inner.lock().await;
        let now = Utc::now();
        let runner_id = tables
            .upsert_runner(&req.name, req.labels.as_ref(), RunnerStatus::Busy, now)
            .id;

        // BTreeMap iterates in ascending id order
        let next = tables
            .jobs
            .values()
            .find(|j| j.status == Status::Queued)
            .map(|j| j.id);

        let Some(job_id) = next else {
            tables.recount_runner(runner_id);
            return Ok(None);
        };

        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("Job {}", job_id)))?;
        job.status = Status::Running;
        job.started_at = Some(now);
        job.runner_id = Some(runner_id);
        let job = job.clone();

        if let Some(run) = tables.runs.get_mut(&job.run_id) {
            run.mark_started(now);
        }
        tables.recount_runner(runner_id);

        Ok(Some(job))
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        Ok(self.inner.lock().await.runners.values().cloned().collect())
    }

    async fn reap_stale_runners(&self, cutoff: DateTime<Utc>) -> StoreResult<ReapReport> {
        let mut tables = self.inner.lock().await;
        let stale: HashSet<i64> = tables
            .runners
            .values()
            .filter(|r| r.last_heartbeat_at < cutoff)
            .map(|r| r.id)
            .collect();

        let mut report = ReapReport::default();
        if stale.is_empty() {
            return Ok(report);
        }

        for job in tables.jobs.values_mut() {
            if job.status == Status::Running && job.runner_id.is_some_and(|id| stale.contains(&id))
            {
                job.status = Status::Queued;
                job.runner_id = None;
                job.started_at = None;
                report.requeued_jobs.push(job.id);
            }
        }

        for runner in tables.runners.values_mut() {
            if stale.contains(&runner.id) && runner.status != RunnerStatus::Offline {
                runner.status = RunnerStatus::Offline;
                runner.current_running = 0;
                report.offline_runners.push(runner.id);
            }
        }

        Ok(report)
    }
}

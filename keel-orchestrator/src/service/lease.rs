//! Background lease reaper for silent runners.
//!
//! A runner that stops heartbeating keeps its claimed jobs in `running`
//! forever unless something takes them back. The reaper periodically
//! requeues the running jobs of every runner whose last heartbeat is older
//! than the lease and marks those runners offline.
//!
//! The task stops when its `CancellationToken` is cancelled.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::repository::{ReapReport, Store, StoreResult};

#[derive(Clone)]
pub struct LeaseReaper {
    store: Arc<dyn Store>,
    lease: Duration,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn Store>, lease: Duration, interval: Duration) -> Self {
        Self {
            store,
            lease,
            interval,
        }
    }

    /// Spawn the reaper loop, returning the token that stops it
    pub fn spawn(self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            self.run(token).await;
        });

        cancel
    }

    /// Main reaper loop
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            lease_secs = self.lease.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Lease reaper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Lease reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once().await {
                        tracing::warn!(error = %e, "Lease reaper pass failed");
                    }
                }
            }
        }
    }

    /// Run a single pass against the current time
    pub async fn reap_once(&self) -> StoreResult<ReapReport> {
        self.reap_at(Utc::now()).await
    }

    async fn reap_at(&self, now: DateTime<Utc>) -> StoreResult<ReapReport> {
        let lease = TimeDelta::from_std(self.lease).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let report = self.store.reap_stale_runners(cutoff).await?;

        if !report.requeued_jobs.is_empty() || !report.offline_runners.is_empty() {
            tracing::warn!(
                jobs = ?report.requeued_jobs,
                runners = ?report.offline_runners,
                "Requeued {} job(s) from {} silent runner(s)",
                report.requeued_jobs.len(),
                report.offline_runners.len()
            );
        } else {
            tracing::debug!("Lease reaper found no silent runners");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use keel_core::domain::{JobKind, NewJob, RunnerStatus, Status};
    use keel_core::dto::project::{CreatePipeline, CreateProject};
    use keel_core::dto::run::TriggerRun;
    use keel_core::dto::runner::ClaimRequest;

    async fn store_with_claimed_job() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(CreateProject {
                name: "p".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let pipeline = store
            .create_pipeline(
                project.id,
                CreatePipeline {
                    name: "ci".to_string(),
                    yaml: "stages: []".to_string(),
                    version: None,
                },
            )
            .await
            .unwrap();
        store
            .create_run(
                pipeline.id,
                &TriggerRun::default(),
                vec![NewJob {
                    stage: "build".to_string(),
                    name: "build-1".to_string(),
                    kind: JobKind::Step,
                    image: None,
                    command: "sleep 60".to_string(),
                }],
            )
            .await
            .unwrap();
        let job = store
            .claim_next_job(&ClaimRequest {
                name: "r1".to_string(),
                labels: None,
            })
            .await
            .unwrap()
            .unwrap();

        (store, job.id)
    }

    #[tokio::test]
    async fn test_reap_requeues_jobs_of_silent_runner() {
        let (store, job_id) = store_with_claimed_job().await;
        let reaper = LeaseReaper::new(
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        let later = Utc::now() + TimeDelta::seconds(120);
        let report = reaper.reap_at(later).await.unwrap();
        assert_eq!(report.requeued_jobs, vec![job_id]);

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, Status::Queued);
        assert_eq!(job.runner_id, None);

        let runners = store.list_runners().await.unwrap();
        assert_eq!(runners[0].status, RunnerStatus::Offline);
    }

    #[tokio::test]
    async fn test_reap_keeps_fresh_runner() {
        let (store, job_id) = store_with_claimed_job().await;
        let reaper = LeaseReaper::new(
            store.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        let report = reaper.reap_once().await.unwrap();
        assert!(report.requeued_jobs.is_empty());

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, Status::Running);
    }

    #[tokio::test]
    async fn test_spawned_reaper_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let cancel = LeaseReaper::new(store, Duration::from_secs(1), Duration::from_millis(10)).spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        assert!(cancel.is_cancelled());
    }
}

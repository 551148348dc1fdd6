//! Agent loop
//!
//! Runs one job at a time. Each iteration heartbeats, claims the oldest
//! queued job and executes it, then sleeps for the poll interval. While a job
//! runs, a background ticker keeps heartbeating so the orchestrator does not
//! consider the runner gone.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

use crate::config::Config;
use crate::repository::ControlPlane;
use crate::service::ExecutionService;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Agent {
    config: Config,
    control: Arc<dyn ControlPlane>,
    executor: ExecutionService,
}

impl Agent {
    pub fn new(config: Config, control: Arc<dyn ControlPlane>, executor: ExecutionService) -> Self {
        Self {
            config,
            control,
            executor,
        }
    }

    /// Run until `cancel` fires
    ///
    /// A job already executing is finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if !self.wait_for_control_plane(&cancel).await {
            info!("Cancelled before the orchestrator became reachable");
            return Ok(());
        }

        info!(
            runner = %self.config.runner_name,
            "Starting agent loop (poll interval: {:?})",
            self.config.poll_interval
        );

        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(true) => debug!("Iteration finished a job"),
                Ok(false) => debug!("No job available"),
                Err(e) => error!("Agent iteration failed: {:#}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Agent loop stopped");
        Ok(())
    }

    /// Poll `/health` with capped exponential backoff. False when cancelled first.
    async fn wait_for_control_plane(&self, cancel: &CancellationToken) -> bool {
        let mut attempt: u32 = 0;
        let mut delay = INITIAL_BACKOFF;

        loop {
            attempt += 1;
            match self.control.health().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Orchestrator reachable after {} attempt(s)", attempt);
                    }
                    return true;
                }
                Err(e) => {
                    warn!("Orchestrator not reachable (attempt {}): {:#}", attempt, e);
                    warn!("Retrying in {} ms...", delay.as_millis());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = time::sleep(delay) => {}
            }

            // Exponential backoff with cap
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// One heartbeat, claim and (if a job was claimed) execution
    ///
    /// Returns whether a job was executed.
    pub async fn run_once(&self) -> Result<bool> {
        self.control.heartbeat(&self.heartbeat_request(0)).await?;

        let claim = ClaimRequest {
            name: self.config.runner_name.clone(),
            labels: self.labels(),
        };
        let Some(job) = self.control.claim(&claim).await? else {
            return Ok(false);
        };

        info!(job_id = job.id, "Claimed job {} ({})", job.name, job.stage);

        let ticker = self.spawn_busy_heartbeat();
        let result = self.executor.execute(&job).await;
        ticker.cancel();

        let report = result?;
        info!(job_id = job.id, "Job reported as {}", report.status);

        Ok(true)
    }

    fn spawn_busy_heartbeat(&self) -> CancellationToken {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let control = self.control.clone();
        let req = self.heartbeat_request(1);
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = control.heartbeat(&req).await {
                            warn!("Failed to send heartbeat: {:#}", e);
                        }
                    }
                }
            }
        });

        stop
    }

    fn heartbeat_request(&self, current_running: i32) -> HeartbeatRequest {
        HeartbeatRequest {
            name: self.config.runner_name.clone(),
            labels: self.labels(),
            max_concurrency: Some(1),
            current_running: Some(current_running),
        }
    }

    fn labels(&self) -> Option<std::collections::BTreeMap<String, String>> {
        if self.config.labels.is_empty() {
            None
        } else {
            Some(self.config.labels.clone())
        }
    }
}

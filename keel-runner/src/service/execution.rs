//! Job execution
//!
//! Runs one claimed job in a sandbox from context fetch to finish report.
//! Any failure on the way is written to the job log and reported as a failed
//! job, so a job never stays `running` because the agent hit an error.

use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keel_core::domain::Job;
use keel_core::dto::job::FinishJob;

use super::log_buffer::{LogBuffer, spawn_log_flusher};
use super::plan::SandboxSpec;
use super::sandbox::Sandbox;
use crate::repository::ControlPlane;

/// How long to wait for trailing output once the sandbox has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ExecutionService {
    control: Arc<dyn ControlPlane>,
    sandbox: Arc<dyn Sandbox>,
    default_image: String,
    log_flush_interval: Duration,
}

impl ExecutionService {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        sandbox: Arc<dyn Sandbox>,
        default_image: impl Into<String>,
        log_flush_interval: Duration,
    ) -> Self {
        Self {
            control,
            sandbox,
            default_image: default_image.into(),
            log_flush_interval,
        }
    }

    /// Execute a claimed job and report its outcome
    ///
    /// Returns the report that was sent. Errors only when the report itself
    /// could not be delivered.
    pub async fn execute(&self, job: &Job) -> Result<FinishJob> {
        info!(job_id = job.id, run_id = job.run_id, "Executing job {}", job.name);

        let buffer = LogBuffer::new();
        let mut container: Option<String> = None;

        let outcome = self.run_sandbox(job, &buffer, &mut container).await;

        if let Some(id) = container {
            if let Err(e) = self.sandbox.remove(&id).await {
                warn!(job_id = job.id, "Failed to remove sandbox: {:#}", e);
            }
        }

        let report = match outcome {
            Ok(exit_code) => {
                info!(job_id = job.id, exit_code, "Sandbox exited");
                FinishJob::from_exit_code(exit_code)
            }
            Err(e) => {
                error!(job_id = job.id, "Job execution failed: {:#}", e);
                buffer.push_line(&format!("[keel] job failed before completion: {:#}", e));
                FinishJob::failed()
            }
        };

        self.flush(job.id, &buffer).await;
        self.control.finish_job(job.id, &report).await?;

        Ok(report)
    }

    async fn run_sandbox(
        &self,
        job: &Job,
        buffer: &LogBuffer,
        container: &mut Option<String>,
    ) -> Result<i32> {
        let context = self.control.job_context(job.id).await?;
        let spec = SandboxSpec::resolve(job, &context, &self.default_image);

        buffer.push_line(&format!("[keel] pulling image {}", spec.image));
        self.sandbox.pull(&spec.image).await?;

        let id = self.sandbox.create(&spec).await?;
        *container = Some(id.clone());

        let mut output = self.sandbox.attach(&id).await?;
        let pump_buffer = buffer.clone();
        let job_id = job.id;
        let mut pump = tokio::spawn(async move {
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(bytes) => pump_buffer.push(&bytes),
                    Err(e) => {
                        warn!(job_id, "Output stream error: {:#}", e);
                        break;
                    }
                }
            }
        });

        let stop_flusher = CancellationToken::new();
        let flusher = spawn_log_flusher(
            job.id,
            buffer.clone(),
            self.control.clone(),
            self.log_flush_interval,
            stop_flusher.clone(),
        );

        let result = async {
            self.sandbox.start(&id).await?;
            self.sandbox.wait(&id).await
        }
        .await;

        if result.is_err() {
            pump.abort();
        } else if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut pump).await.is_err() {
            warn!(job_id, "Output stream still open after exit, dropping it");
            pump.abort();
        }
        stop_flusher.cancel();
        if let Err(e) = flusher.await {
            warn!(job_id, "Log flusher ended abnormally: {}", e);
        }

        let code = result?;
        Ok(i32::try_from(code).unwrap_or(i32::MAX))
    }

    async fn flush(&self, job_id: i64, buffer: &LogBuffer) {
        let rest = buffer.drain_all();
        if rest.is_empty() {
            return;
        }

        if let Err(e) = self.control.append_logs(job_id, &rest).await {
            warn!(job_id, "Failed to send final logs: {:#}", e);
        }
    }
}

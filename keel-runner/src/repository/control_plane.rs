use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_client::OrchestratorClient;
use keel_core::domain::{Job, Runner};
use keel_core::dto::job::{FinishJob, JobContext};
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

/// Orchestrator operations used by the agent loop and job execution
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Succeeds once the orchestrator answers its health check
    async fn health(&self) -> Result<()>;

    async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<Runner>;

    async fn claim(&self, req: &ClaimRequest) -> Result<Option<Job>>;

    async fn job_context(&self, job_id: i64) -> Result<JobContext>;

    async fn append_logs(&self, job_id: i64, chunk: &str) -> Result<()>;

    async fn finish_job(&self, job_id: i64, report: &FinishJob) -> Result<Job>;
}

#[async_trait]
impl ControlPlane for OrchestratorClient {
    async fn health(&self) -> Result<()> {
        OrchestratorClient::health(self)
            .await
            .context("Orchestrator health check failed")
    }

    async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<Runner> {
        OrchestratorClient::heartbeat(self, req)
            .await
            .context("Failed to send heartbeat")
    }

    async fn claim(&self, req: &ClaimRequest) -> Result<Option<Job>> {
        OrchestratorClient::claim(self, req)
            .await
            .context("Failed to claim job")
    }

    async fn job_context(&self, job_id: i64) -> Result<JobContext> {
        self.get_job_context(job_id)
            .await
            .with_context(|| format!("Failed to fetch context for job {}", job_id))
    }

    async fn append_logs(&self, job_id: i64, chunk: &str) -> Result<()> {
        OrchestratorClient::append_logs(self, job_id, chunk)
            .await
            .with_context(|| format!("Failed to send logs for job {}", job_id))
    }

    async fn finish_job(&self, job_id: i64, report: &FinishJob) -> Result<Job> {
        OrchestratorClient::finish_job(self, job_id, report)
            .await
            .with_context(|| format!("Failed to finish job {}", job_id))
    }
}

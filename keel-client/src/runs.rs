//! Run-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use keel_core::domain::{Job, Run};
use keel_core::dto::run::{RunDetail, TriggerRun};

impl OrchestratorClient {
    // =============================================================================
    // Run Lifecycle
    // =============================================================================

    /// Trigger a new run of a pipeline
    ///
    /// # Example
    /// ```no_run
    /// # use keel_client::OrchestratorClient;
    /// # use keel_core::dto::run::TriggerRun;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let run = client.trigger_run(1, &TriggerRun {
    ///     commit_sha: Some("4f2a9c1".to_string()),
    ///     git_ref: Some("main".to_string()),
    ///     triggered_by: None,
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn trigger_run(&self, pipeline_id: i64, req: &TriggerRun) -> Result<Run> {
        let url = self.url(&format!("/pipelines/{}/run", pipeline_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a run and its unfinished jobs
    pub async fn cancel_run(&self, run_id: i64) -> Result<Run> {
        let url = self.url(&format!("/runs/{}/cancel", run_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Queue a deploy job at the end of a run
    pub async fn deploy_run(&self, run_id: i64) -> Result<Job> {
        let url = self.url(&format!("/runs/{}/deploy", run_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// Get a run with its jobs, counts and aggregated status
    pub async fn get_run(&self, run_id: i64) -> Result<RunDetail> {
        let url = self.url(&format!("/runs/{}", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List a run's jobs ordered by step index
    pub async fn list_run_jobs(&self, run_id: i64) -> Result<Vec<Job>> {
        let url = self.url(&format!("/runs/{}/jobs", run_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}

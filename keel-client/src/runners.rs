//! Runner-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use keel_core::domain::{Job, Runner};
use keel_core::dto::runner::{ClaimRequest, HeartbeatRequest};

impl OrchestratorClient {
    // =============================================================================
    // Agent Lifecycle
    // =============================================================================

    /// Send a heartbeat, registering the runner on first contact
    ///
    /// # Example
    /// ```no_run
    /// # use keel_client::OrchestratorClient;
    /// # use keel_core::dto::runner::HeartbeatRequest;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let runner = client.heartbeat(&HeartbeatRequest {
    ///     name: "runner-01".to_string(),
    ///     ..Default::default()
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<Runner> {
        let response = self
            .client
            .post(self.url("/runners/heartbeat"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Claim the oldest queued job
    ///
    /// # Returns
    /// The claimed job, already marked running, or `None` when nothing is queued
    pub async fn claim(&self, req: &ClaimRequest) -> Result<Option<Job>> {
        let response = self
            .client
            .post(self.url("/runners/claim"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// List all known runners
    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        let response = self.client.get(self.url("/runners")).send().await?;

        self.handle_response(response).await
    }
}

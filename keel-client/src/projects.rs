//! Project and pipeline API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use keel_core::domain::{Pipeline, Project};
use keel_core::dto::project::{CreatePipeline, CreateProject};

impl OrchestratorClient {
    /// Create a project
    pub async fn create_project(&self, req: &CreateProject) -> Result<Project> {
        let response = self
            .client
            .post(self.url("/projects"))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a project by ID
    pub async fn get_project(&self, project_id: i64) -> Result<Project> {
        let url = self.url(&format!("/projects/{}", project_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Store a pipeline definition under a project
    pub async fn create_pipeline(&self, project_id: i64, req: &CreatePipeline) -> Result<Pipeline> {
        let url = self.url(&format!("/projects/{}/pipelines", project_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: i64) -> Result<Pipeline> {
        let url = self.url(&format!("/pipelines/{}", pipeline_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}

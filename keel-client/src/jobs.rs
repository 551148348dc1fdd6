//! Job-related API endpoints

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};
use crate::sse::SseDecoder;
use keel_core::domain::Job;
use keel_core::dto::job::{AppendLogs, AppendLogsResponse, FinishJob, JobContext};

impl OrchestratorClient {
    // =============================================================================
    // Job Execution (Runner-specific)
    // =============================================================================

    /// Fetch the workspace mapping and environment for a claimed job
    pub async fn get_job_context(&self, job_id: i64) -> Result<JobContext> {
        let url = self.url(&format!("/jobs/{}/context", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Report a job's terminal status
    ///
    /// # Returns
    /// The job as stored. A job that was already finished (for example
    /// because its run was cancelled) comes back unchanged.
    pub async fn finish_job(&self, job_id: i64, req: &FinishJob) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}/finish", job_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Logs
    // =============================================================================

    /// Append a chunk of output to a job's log. Empty chunks are not sent.
    pub async fn append_logs(&self, job_id: i64, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let url = self.url(&format!("/jobs/{}/logs", job_id));
        let response = self
            .client
            .post(&url)
            .json(&AppendLogs {
                chunk: chunk.to_string(),
            })
            .send()
            .await?;

        let _: AppendLogsResponse = self.handle_response(response).await?;
        Ok(())
    }

    /// Get the full log of a job as plain text
    pub async fn get_job_logs(&self, job_id: i64) -> Result<String> {
        let url = self.url(&format!("/jobs/{}/logs", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_text_response(response).await
    }

    /// Follow a job's log from byte `offset`
    ///
    /// Each item is the text appended since the previous one. The stream
    /// ends when the server closes the connection.
    pub async fn stream_job_logs(
        &self,
        job_id: i64,
        offset: u64,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let url = self.url(&format!("/jobs/{}/logs/stream?offset={}", job_id, offset));
        let response = self.client.get(&url).send().await?;
        let response = Self::check_status(response).await?;

        let body = response.bytes_stream().boxed();
        let state = (body, SseDecoder::new(), VecDeque::<String>::new());

        Ok(stream::unfold(state, |(mut body, mut decoder, mut ready)| async move {
            loop {
                if let Some(text) = ready.pop_front() {
                    return Some((Ok(text), (body, decoder, ready)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                    Some(Err(e)) => return Some((Err(ClientError::from(e)), (body, decoder, ready))),
                    None => return None,
                }
            }
        })
        .boxed())
    }
}

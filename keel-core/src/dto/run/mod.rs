//! Run DTOs
//!
//! Data transfer objects for triggering and inspecting runs.

use serde::{Deserialize, Serialize};

use crate::domain::job::Job;
use crate::domain::run::Run;
use crate::domain::status::{Status, aggregate};

/// Optional metadata attached to a triggered run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
    pub total: usize,
}

impl JobCounts {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        let mut counts = JobCounts::default();
        for job in jobs {
            match job.status {
                Status::Queued => counts.queued += 1,
                Status::Running => counts.running += 1,
                Status::Success => counts.success += 1,
                Status::Failed => counts.failed += 1,
                Status::Canceled => counts.canceled += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

/// A run with its jobs and a freshly computed status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetail {
    pub run: Run,
    pub jobs: Vec<Job>,
    pub counts: JobCounts,
    pub aggregated_status: Status,
}

impl RunDetail {
    pub fn new(run: Run, jobs: Vec<Job>) -> Self {
        let counts = JobCounts::from_jobs(&jobs);
        let aggregated_status = aggregate(jobs.iter().map(|j| j.status)).unwrap_or(run.status);
        Self {
            run,
            jobs,
            counts,
            aggregated_status,
        }
    }
}

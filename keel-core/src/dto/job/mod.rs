//! Job DTOs
//!
//! Data transfer objects for job execution and reporting.

use serde::{Deserialize, Serialize};

use crate::domain::status::Status;

/// Everything an agent needs to set up a job's sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    /// Host directory bound into the sandbox
    pub workdir_host: String,

    /// Mount point of `workdir_host` inside the sandbox
    pub workdir_in_container: String,

    /// `KEY=value` pairs
    pub env_vars: Vec<String>,
}

/// A chunk of raw output to append to a job's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendLogs {
    pub chunk: String,
}

/// Acknowledgement for an append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendLogsResponse {
    pub success: bool,
}

/// Final report for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishJob {
    pub status: Status,

    #[serde(default)]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_location: Option<String>,
}

impl FinishJob {
    /// Report derived from a process exit code
    pub fn from_exit_code(exit_code: i32) -> Self {
        Self {
            status: if exit_code == 0 {
                Status::Success
            } else {
                Status::Failed
            },
            exit_code: Some(exit_code),
            logs_location: None,
            artifacts_location: None,
        }
    }

    /// Report for a job that never produced an exit code
    pub fn failed() -> Self {
        Self {
            status: Status::Failed,
            exit_code: None,
            logs_location: None,
            artifacts_location: None,
        }
    }
}

//! Runner domain model
//!
//! Represents an execution agent known to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An execution agent, upserted by name on every heartbeat and claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runner {
    pub id: i64,

    /// Unique name chosen by the agent
    pub name: String,

    /// Free-form labels reported by the agent
    pub labels: BTreeMap<String, String>,

    pub max_concurrency: i32,

    /// Number of jobs currently `running` with this runner attached
    pub current_running: i32,

    pub status: RunnerStatus,

    pub last_heartbeat_at: DateTime<Utc>,
}

/// Status of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    /// Runner is online and ready to accept jobs
    Online,

    /// Runner is currently executing a job
    Busy,

    /// Runner hasn't sent a heartbeat recently
    Offline,
}

impl RunnerStatus {
    /// `busy` while anything is running, `online` otherwise
    pub fn for_running_count(count: i64) -> Self {
        if count > 0 {
            RunnerStatus::Busy
        } else {
            RunnerStatus::Online
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunnerStatus::Online => "online",
            RunnerStatus::Busy => "busy",
            RunnerStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(RunnerStatus::Online),
            "busy" => Some(RunnerStatus::Busy),
            "offline" => Some(RunnerStatus::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

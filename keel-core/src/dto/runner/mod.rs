//! Runner DTOs
//!
//! Data transfer objects for heartbeat and claim calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Liveness report from an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// A missing name reads as empty and is rejected by the orchestrator
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Defaults to 1 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i32>,

    /// Defaults to 0 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_running: Option<i32>,
}

/// Request for the next queued job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

//! Project domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A project groups pipelines and carries the deploy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Injected into the sandbox of every job of this project
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// How a project is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Command,
    Dockerfile,
    Compose,
}

/// Deploy settings. Every field is optional; see `ExecutionConfig::resolve_driver`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub run_mode: Option<RunMode>,
    pub start_command: Option<String>,
    pub dockerfile_path: Option<String>,
    pub compose_path: Option<String>,
}

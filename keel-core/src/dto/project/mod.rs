//! Project and pipeline DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::project::ExecutionConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub name: String,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,

    /// Pipeline definition as YAML
    pub yaml: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

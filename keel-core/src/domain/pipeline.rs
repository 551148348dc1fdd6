//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{DefinitionError, PipelineDefinition};

/// A stored pipeline definition belonging to a project
///
/// The YAML is kept verbatim and only resolved when a run is triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub yaml: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn definition(&self) -> Result<PipelineDefinition, DefinitionError> {
        PipelineDefinition::from_yaml(&self.yaml)
    }
}

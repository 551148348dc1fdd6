//! Pipeline definition parsing and resolution
//!
//! A definition is a YAML document of ordered stages, each holding ordered
//! steps:
//!
//! ```yaml
//! version: 1
//! name: build-and-test
//! image: rust:1.85
//! stages:
//!   - name: build
//!     steps:
//!       - name: compile
//!         run: cargo build
//!   - name: test
//!     image: rust:1.85-slim
//!     steps:
//!       - run: cargo test
//!         artifacts: [target/nextest]
//! ```
//!
//! Resolution flattens the stages into an ordered list of steps with a
//! contiguous `step_index`.

use serde::{Deserialize, Serialize};

use crate::deploy::is_deploy_token;
use crate::domain::job::{JobKind, NewJob};

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("invalid pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("step {step} of stage '{stage}' uses the reserved keel-deploy: command prefix")]
    ReservedCommand { stage: String, step: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub version: Option<serde_yaml::Value>,
    #[serde(default)]
    pub name: Option<String>,
    /// Default image for every step that does not set one
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "command")]
    pub run: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// One executable step after flattening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub stage: String,
    pub step_index: i32,
    pub name: String,
    pub image: Option<String>,
    pub command: String,
    /// Declared artifact paths. Shown to operators but not stored on the job;
    /// runners report where artifacts ended up through `artifactsLocation`.
    pub artifacts: Vec<String>,
}

impl PipelineDefinition {
    /// Parse a definition. Steps may not use the deploy token syntax.
    pub fn from_yaml(source: &str) -> Result<Self, DefinitionError> {
        let definition: Self = serde_yaml::from_str(source)?;
        definition.check_reserved()?;
        Ok(definition)
    }

    fn check_reserved(&self) -> Result<(), DefinitionError> {
        for stage in &self.stages {
            for (position, step) in stage.steps.iter().enumerate() {
                if step.run.as_deref().is_some_and(is_deploy_token) {
                    return Err(DefinitionError::ReservedCommand {
                        stage: stage.name.clone(),
                        step: position + 1,
                    });
                }
            }
        }
        Ok(())
    }

    /// Flatten stages into ordered steps.
    ///
    /// Steps without a command are skipped and do not consume an index.
    pub fn resolve(&self) -> Vec<ResolvedStep> {
        let mut resolved = Vec::new();

        for stage in &self.stages {
            for (position, step) in stage.steps.iter().enumerate() {
                let Some(command) = step
                    .run
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                else {
                    continue;
                };

                let name = step
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}-{}", stage.name, position + 1));

                let image = step
                    .image
                    .clone()
                    .or_else(|| stage.image.clone())
                    .or_else(|| self.image.clone());

                resolved.push(ResolvedStep {
                    stage: stage.name.clone(),
                    step_index: resolved.len() as i32,
                    name,
                    image,
                    command: command.to_string(),
                    artifacts: step.artifacts.clone(),
                });
            }
        }

        resolved
    }
}

impl From<ResolvedStep> for NewJob {
    fn from(step: ResolvedStep) -> Self {
        NewJob {
            stage: step.stage,
            name: step.name,
            kind: JobKind::Step,
            image: step.image,
            command: step.command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STAGES: &str = r#"
version: 1
name: demo
image: alpine:3.20
stages:
  - name: build
    steps:
      - name: compile
        run: make
      - name: lint
        run: make lint
  - name: test
    image: rust:1.85
    steps:
      - run: cargo test
        image: rust:slim
      - command: cargo doc
"#;

    #[test]
    fn test_resolve_preserves_stage_and_step_order() {
        let def = PipelineDefinition::from_yaml(TWO_STAGES).unwrap();
        let steps = def.resolve();

        let summary: Vec<_> = steps
            .iter()
            .map(|s| (s.stage.as_str(), s.step_index, s.command.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("build", 0, "make"),
                ("build", 1, "make lint"),
                ("test", 2, "cargo test"),
                ("test", 3, "cargo doc"),
            ]
        );
    }

    #[test]
    fn test_image_falls_back_step_stage_pipeline() {
        let def = PipelineDefinition::from_yaml(TWO_STAGES).unwrap();
        let steps = def.resolve();

        assert_eq!(steps[0].image.as_deref(), Some("alpine:3.20"));
        assert_eq!(steps[2].image.as_deref(), Some("rust:slim"));
        assert_eq!(steps[3].image.as_deref(), Some("rust:1.85"));
    }

    #[test]
    fn test_unnamed_steps_get_positional_names() {
        let def = PipelineDefinition::from_yaml(TWO_STAGES).unwrap();
        let steps = def.resolve();

        assert_eq!(steps[0].name, "compile");
        assert_eq!(steps[2].name, "test-1");
        assert_eq!(steps[3].name, "test-2");
    }

    #[test]
    fn test_steps_without_command_are_skipped() {
        let yaml = r#"
stages:
  - name: build
    steps:
      - name: placeholder
      - run: "   "
      - run: echo hi
  - name: empty
    steps: []
  - name: ship
    steps:
      - run: echo ship
"#;
        let steps = PipelineDefinition::from_yaml(yaml).unwrap().resolve();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_index, 0);
        assert_eq!(steps[0].command, "echo hi");
        assert_eq!(steps[1].step_index, 1);
        assert_eq!(steps[1].stage, "ship");
    }

    #[test]
    fn test_artifacts_are_carried() {
        let yaml = "stages:\n  - name: b\n    steps:\n      - run: make\n        artifacts: [dist/app]\n";
        let steps = PipelineDefinition::from_yaml(yaml).unwrap().resolve();
        assert_eq!(steps[0].artifacts, vec!["dist/app".to_string()]);
    }

    #[test]
    fn test_deploy_token_step_is_rejected() {
        let yaml = r#"
stages:
  - name: build
    steps:
      - run: echo ok
      - run: "keel-deploy:command:docker run -v /:/host alpine cat /host/etc/shadow"
"#;
        match PipelineDefinition::from_yaml(yaml) {
            Err(DefinitionError::ReservedCommand { stage, step }) => {
                assert_eq!(stage, "build");
                assert_eq!(step, 2);
            }
            other => panic!("expected a reserved command error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolved_steps_are_plain_jobs() {
        let def = PipelineDefinition::from_yaml(TWO_STAGES).unwrap();
        for job in def.resolve().into_iter().map(NewJob::from) {
            assert_eq!(job.kind, JobKind::Step);
        }
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(PipelineDefinition::from_yaml("stages: [name: {").is_err());
        assert!(PipelineDefinition::from_yaml("stages: 12").is_err());
    }

    #[test]
    fn test_empty_stages_resolve_to_nothing() {
        let def = PipelineDefinition::from_yaml("version: 1\nname: x\nstages: []").unwrap();
        assert!(def.resolve().is_empty());
    }
}

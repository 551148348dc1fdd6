//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::Status;
use crate::deploy::DeployDriver;

/// A single executable step of a run
///
/// Structure shared between orchestrator (persists) and runner (executes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub run_id: i64,
    pub stage: String,
    pub step_index: i32,
    pub name: String,
    #[serde(default)]
    pub kind: JobKind,
    pub status: Status,
    pub image: Option<String>,
    pub command: String,
    pub runner_id: Option<i64>,
    pub exit_code: Option<i32>,
    pub logs_location: Option<String>,
    pub artifacts_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The deployment driver of a deploy job
    ///
    /// Only jobs created by a deploy request qualify. A pipeline step whose
    /// command happens to look like a deploy token is still a plain step.
    pub fn deploy_driver(&self) -> Option<DeployDriver> {
        match self.kind {
            JobKind::Deploy => DeployDriver::from_token(&self.command),
            JobKind::Step => None,
        }
    }

    /// Public location of a job's log, as recorded on first append
    pub fn logs_path(job_id: i64) -> String {
        format!("/logs/jobs/{}.log", job_id)
    }
}

/// Where a job came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Resolved from the pipeline definition
    #[default]
    Step,
    /// Appended by a deploy request. Runs with access to the host Docker daemon.
    Deploy,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Step => "step",
            JobKind::Deploy => "deploy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "step" => Some(JobKind::Step),
            "deploy" => Some(JobKind::Deploy),
            _ => None,
        }
    }
}

/// A job to insert, produced by definition resolution or a deploy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub stage: String,
    pub name: String,
    pub kind: JobKind,
    pub image: Option<String>,
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind, command: &str) -> Job {
        Job {
            id: 1,
            run_id: 1,
            stage: "build".to_string(),
            step_index: 0,
            name: "build-1".to_string(),
            kind,
            status: Status::Running,
            image: None,
            command: command.to_string(),
            runner_id: None,
            exit_code: None,
            logs_location: None,
            artifacts_location: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_step_with_token_command_is_not_a_deploy() {
        let job = job(JobKind::Step, "keel-deploy:command:docker run -v /:/host alpine");
        assert_eq!(job.deploy_driver(), None);
    }

    #[test]
    fn test_deploy_job_yields_driver() {
        let job = job(JobKind::Deploy, "keel-deploy:compose:docker-compose.yml");
        assert_eq!(
            job.deploy_driver(),
            Some(DeployDriver::Compose {
                path: "docker-compose.yml".to_string()
            })
        );
    }

    #[test]
    fn test_kind_defaults_to_step_on_the_wire() {
        let json = r#"{"id":1,"runId":1,"stage":"b","stepIndex":0,"name":"b-1","status":"queued",
            "image":null,"command":"ls","runnerId":null,"exitCode":null,"logsLocation":null,
            "artifactsLocation":null,"createdAt":"2024-05-01T10:00:00Z","startedAt":null,"finishedAt":null}"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.kind, JobKind::Step);
        assert_eq!(JobKind::parse(JobKind::Deploy.as_str()), Some(JobKind::Deploy));
    }
}

//! Deployment drivers
//!
//! A deploy job's command is a token naming the driver and its argument,
//! e.g. `keel-deploy:compose:docker-compose.yml`. The runner turns the token
//! back into a shell script run inside the Docker CLI image.

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobKind, NewJob};
use crate::domain::project::{ExecutionConfig, RunMode};

pub const DEPLOY_STAGE: &str = "Deploy";
pub const DEPLOY_JOB_NAME: &str = "deploy";
pub const DEPLOY_IMAGE: &str = "docker:27-cli";
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

const TOKEN_PREFIX: &str = "keel-deploy";

/// Whether a command uses the deploy token syntax
pub fn is_deploy_token(command: &str) -> bool {
    command
        .trim_start()
        .strip_prefix(TOKEN_PREFIX)
        .is_some_and(|rest| rest.starts_with(':'))
}
const DEFAULT_DOCKERFILE: &str = "Dockerfile";
const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("run mode 'command' requires a start command")]
    MissingStartCommand,
}

/// How to deploy a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DeployDriver {
    Command { start_command: String },
    Dockerfile { path: String },
    Compose { path: String },
}

impl ExecutionConfig {
    /// Pick the deployment driver for this configuration.
    ///
    /// An explicit `run_mode` wins. Otherwise the first configured of compose
    /// path, dockerfile path and start command decides, falling back to compose
    /// with the default file name.
    pub fn resolve_driver(&self) -> Result<DeployDriver, ConfigError> {
        let start_command = non_blank(&self.start_command);
        let dockerfile = non_blank(&self.dockerfile_path);
        let compose = non_blank(&self.compose_path);

        let driver = match self.run_mode {
            Some(RunMode::Command) => DeployDriver::Command {
                start_command: start_command.ok_or(ConfigError::MissingStartCommand)?,
            },
            Some(RunMode::Dockerfile) => DeployDriver::Dockerfile {
                path: dockerfile.unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
            },
            Some(RunMode::Compose) => DeployDriver::Compose {
                path: compose.unwrap_or_else(|| DEFAULT_COMPOSE_FILE.to_string()),
            },
            None => {
                if let Some(path) = compose {
                    DeployDriver::Compose { path }
                } else if let Some(path) = dockerfile {
                    DeployDriver::Dockerfile { path }
                } else if let Some(start_command) = start_command {
                    DeployDriver::Command { start_command }
                } else {
                    DeployDriver::Compose {
                        path: DEFAULT_COMPOSE_FILE.to_string(),
                    }
                }
            }
        };

        Ok(driver)
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl DeployDriver {
    pub fn name(&self) -> &'static str {
        match self {
            DeployDriver::Command { .. } => "command",
            DeployDriver::Dockerfile { .. } => "dockerfile",
            DeployDriver::Compose { .. } => "compose",
        }
    }

    fn argument(&self) -> &str {
        match self {
            DeployDriver::Command { start_command } => start_command,
            DeployDriver::Dockerfile { path } | DeployDriver::Compose { path } => path,
        }
    }

    pub fn to_token(&self) -> String {
        format!("{}:{}:{}", TOKEN_PREFIX, self.name(), self.argument())
    }

    /// Parse a job command back into a driver. Anything else yields `None`.
    pub fn from_token(command: &str) -> Option<Self> {
        let rest = command.strip_prefix(TOKEN_PREFIX)?.strip_prefix(':')?;
        let (driver, argument) = rest.split_once(':')?;
        if argument.is_empty() {
            return None;
        }
        let argument = argument.to_string();

        match driver {
            "command" => Some(DeployDriver::Command {
                start_command: argument,
            }),
            "dockerfile" => Some(DeployDriver::Dockerfile { path: argument }),
            "compose" => Some(DeployDriver::Compose { path: argument }),
            _ => None,
        }
    }

    /// Shell script executed by the runner inside the Docker CLI image
    pub fn script(&self) -> String {
        match self {
            DeployDriver::Command { start_command } => start_command.clone(),
            DeployDriver::Dockerfile { path } => format!(
                "docker build -f {path} -t keel-app:latest . && \
                 (docker rm -f keel-app >/dev/null 2>&1 || true) && \
                 docker run -d --name keel-app keel-app:latest",
                path = shell_quote(path)
            ),
            DeployDriver::Compose { path } => {
                format!("docker compose -f {} up -d --build", shell_quote(path))
            }
        }
    }

    /// The synthetic job appended to a run by a deploy request
    pub fn to_job(&self) -> NewJob {
        NewJob {
            stage: DEPLOY_STAGE.to_string(),
            name: DEPLOY_JOB_NAME.to_string(),
            kind: JobKind::Deploy,
            image: Some(DEPLOY_IMAGE.to_string()),
            command: self.to_token(),
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

//! Project command handlers
//!
//! Creates projects with their deploy settings and shows them.

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use colored::*;
use keel_client::OrchestratorClient;
use keel_core::deploy::DeployDriver;
use keel_core::domain::{ExecutionConfig, Project, RunMode};
use keel_core::dto::project::CreateProject;

use crate::config::Config;
use crate::output::{format_time, parse_key_val};

/// How the project is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunModeArg {
    Command,
    Dockerfile,
    Compose,
}

impl From<RunModeArg> for RunMode {
    fn from(arg: RunModeArg) -> Self {
        match arg {
            RunModeArg::Command => RunMode::Command,
            RunModeArg::Dockerfile => RunMode::Dockerfile,
            RunModeArg::Compose => RunMode::Compose,
        }
    }
}

/// Project subcommands
#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a new project
    Create {
        /// Project name
        name: String,

        /// Deploy mode
        #[arg(long, value_enum)]
        run_mode: Option<RunModeArg>,

        /// Command started by the command deploy mode
        #[arg(long)]
        start_command: Option<String>,

        /// Dockerfile built by the dockerfile deploy mode
        #[arg(long)]
        dockerfile: Option<String>,

        /// Compose file brought up by the compose deploy mode
        #[arg(long)]
        compose: Option<String>,

        /// Environment variables for every job as KEY=value
        #[arg(short, long, value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Get project details
    Get {
        /// Project ID
        id: i64,
    },
}

/// Handle project commands
pub async fn handle_project_command(command: ProjectCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        ProjectCommands::Create {
            name,
            run_mode,
            start_command,
            dockerfile,
            compose,
            env,
        } => {
            let req = CreateProject {
                name,
                execution: ExecutionConfig {
                    run_mode: run_mode.map(RunMode::from),
                    start_command,
                    dockerfile_path: dockerfile,
                    compose_path: compose,
                },
                env_vars: env.into_iter().collect(),
            };
            create_project(&client, req).await
        }
        ProjectCommands::Get { id } => get_project(&client, id).await,
    }
}

async fn create_project(client: &OrchestratorClient, req: CreateProject) -> Result<()> {
    let project = client.create_project(&req).await?;

    println!("{}", "✓ Project created".green().bold());
    println!();
    print_project_details(&project);

    Ok(())
}

async fn get_project(client: &OrchestratorClient, id: i64) -> Result<()> {
    let project = client.get_project(id).await?;
    print_project_details(&project);
    Ok(())
}

fn print_project_details(project: &Project) {
    println!("{}", "Project Details:".bold());
    println!("  ID:       {}", project.id.to_string().cyan());
    println!("  Name:     {}", project.name);
    println!("  Created:  {}", format_time(project.created_at));

    let execution = &project.execution;
    match execution.resolve_driver() {
        Ok(driver) => println!("  Deploy:   {}", describe_driver(&driver)),
        Err(e) => println!("  Deploy:   {}", e.to_string().red()),
    }

    if !project.env_vars.is_empty() {
        println!("\n{}", "Environment:".bold());
        for (key, value) in &project.env_vars {
            println!("  {} = {}", key.cyan(), value);
        }
    }
}

fn describe_driver(driver: &DeployDriver) -> String {
    match driver {
        DeployDriver::Command { start_command } => format!("{} ({})", driver.name(), start_command),
        DeployDriver::Dockerfile { path } | DeployDriver::Compose { path } => {
            format!("{} ({})", driver.name(), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_driver() {
        let driver = DeployDriver::Compose {
            path: "deploy/compose.yml".to_string(),
        };
        assert!(describe_driver(&driver).ends_with("(deploy/compose.yml)"));
    }

    #[test]
    fn test_run_mode_arg_maps_to_domain() {
        assert_eq!(RunMode::from(RunModeArg::Dockerfile), RunMode::Dockerfile);
    }
}

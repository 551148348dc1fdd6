//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod pipeline;
mod project;
mod run;
mod runner;

pub use job::JobCommands;
pub use pipeline::PipelineCommands;
pub use project::ProjectCommands;
pub use run::RunCommands;
pub use runner::RunnerCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Pipeline definitions
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Run management
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Job inspection and logs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Runner management
    Runner {
        #[command(subcommand)]
        command: RunnerCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Project { command } => project::handle_project_command(command, config).await,
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Runner { command } => runner::handle_runner_command(command, config).await,
    }
}

//! Runner command handlers
//!
//! Handles all runner-related CLI commands including listing runners.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::OrchestratorClient;
use keel_core::domain::Runner;

use crate::config::Config;
use crate::output::{colorize_runner_status, format_time};

/// Runner subcommands
#[derive(Subcommand)]
pub enum RunnerCommands {
    /// List all registered runners
    List,
}

/// Handle runner commands
pub async fn handle_runner_command(command: RunnerCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunnerCommands::List => list_runners(&client).await,
    }
}

/// List all registered runners
async fn list_runners(client: &OrchestratorClient) -> Result<()> {
    let runners = client.list_runners().await?;

    if runners.is_empty() {
        println!("{}", "No runners registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered runner(s):", runners.len()).bold()
        );
        println!();
        for runner in runners {
            print_runner_summary(&runner);
        }
    }

    Ok(())
}

fn print_runner_summary(runner: &Runner) {
    println!(
        "  {} Runner {} {}",
        "▸".cyan(),
        runner.name.bold(),
        format!("#{}", runner.id).dimmed()
    );
    println!("    Status:       {}", colorize_runner_status(runner.status));
    println!(
        "    Running:      {}/{}",
        runner.current_running, runner.max_concurrency
    );
    println!(
        "    Last Seen:    {}",
        format_time(runner.last_heartbeat_at).dimmed()
    );
    if !runner.labels.is_empty() {
        let labels: Vec<String> = runner
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("    Labels:       {}", labels.join(", ").dimmed());
    }
    println!();
}

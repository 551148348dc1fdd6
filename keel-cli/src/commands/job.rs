//! Job command handlers
//!
//! Shows job logs, either as a snapshot or followed live.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use futures::StreamExt;
use keel_client::OrchestratorClient;
use std::io::Write;

use crate::config::Config;
use crate::output::rule;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Get job logs
    Logs {
        /// Job ID
        id: i64,

        /// Keep streaming new output until interrupted
        #[arg(short, long)]
        follow: bool,

        /// Byte offset to start following from
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Show the execution context handed to runners
    Context {
        /// Job ID
        id: i64,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        JobCommands::Logs { id, follow, offset } => {
            if follow {
                follow_job_logs(&client, id, offset).await
            } else {
                get_job_logs(&client, id).await
            }
        }
        JobCommands::Context { id } => get_job_context(&client, id).await,
    }
}

async fn get_job_logs(client: &OrchestratorClient, id: i64) -> Result<()> {
    let logs = client.get_job_logs(id).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for job {}:", id).bold());
        println!("{}", rule());
        print!("{}", logs);
        if !logs.ends_with('\n') {
            println!();
        }
        println!("{}", rule());
    }

    Ok(())
}

/// Stream a job's log until the server closes the connection or ctrl-c
async fn follow_job_logs(client: &OrchestratorClient, id: i64, offset: u64) -> Result<()> {
    let mut stream = client.stream_job_logs(id, offset).await?;
    eprintln!("{}", format!("Following logs for job {} (ctrl-c to stop)", id).dimmed());

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = stream.next() => match next {
                Some(Ok(text)) => {
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
        }
    }

    Ok(())
}

async fn get_job_context(client: &OrchestratorClient, id: i64) -> Result<()> {
    let context = client.get_job_context(id).await?;

    println!("{}", format!("Context for job {}:", id).bold());
    println!("  Workdir (host):      {}", context.workdir_host);
    println!("  Workdir (container): {}", context.workdir_in_container);
    if !context.env_vars.is_empty() {
        println!("\n{}", "Environment:".bold());
        for var in &context.env_vars {
            println!("  {}", var);
        }
    }

    Ok(())
}

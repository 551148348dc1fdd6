//! Run command handlers
//!
//! Triggers runs, inspects their jobs, cancels them and queues deploys.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use keel_client::OrchestratorClient;
use keel_core::domain::{Job, Run};
use keel_core::dto::run::{JobCounts, RunDetail, TriggerRun};

use crate::config::Config;
use crate::output::{colorize_status, duration_secs, format_time};

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Trigger a run of a pipeline
    Trigger {
        /// Pipeline ID
        pipeline_id: i64,

        /// Commit being built
        #[arg(long)]
        sha: Option<String>,

        /// Branch or tag being built
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Who triggered the run
        #[arg(long, env = "USER")]
        by: Option<String>,
    },
    /// Get run details with its jobs
    Get {
        /// Run ID
        id: i64,
    },
    /// List the jobs of a run
    Jobs {
        /// Run ID
        id: i64,
    },
    /// Cancel a run and its unfinished jobs
    Cancel {
        /// Run ID
        id: i64,
    },
    /// Queue a deploy job for a run
    Deploy {
        /// Run ID
        id: i64,
    },
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::Trigger {
            pipeline_id,
            sha,
            git_ref,
            by,
        } => {
            let req = TriggerRun {
                commit_sha: sha,
                git_ref,
                triggered_by: by,
            };
            trigger_run(&client, pipeline_id, &req).await
        }
        RunCommands::Get { id } => get_run(&client, id).await,
        RunCommands::Jobs { id } => list_jobs(&client, id).await,
        RunCommands::Cancel { id } => cancel_run(&client, id).await,
        RunCommands::Deploy { id } => deploy_run(&client, id).await,
    }
}

async fn trigger_run(client: &OrchestratorClient, pipeline_id: i64, req: &TriggerRun) -> Result<()> {
    let run = client.trigger_run(pipeline_id, req).await?;

    println!("{}", "✓ Run queued".green().bold());
    println!();
    print_run_details(&run);

    let jobs = client.list_run_jobs(run.id).await?;
    if jobs.is_empty() {
        println!("\n{}", "The pipeline produced no jobs.".yellow());
    } else {
        println!("\n{}", format!("{} job(s) queued", jobs.len()).bold());
    }

    Ok(())
}

async fn get_run(client: &OrchestratorClient, id: i64) -> Result<()> {
    let detail = client.get_run(id).await?;
    print_run_detail(&detail);
    Ok(())
}

async fn list_jobs(client: &OrchestratorClient, id: i64) -> Result<()> {
    let jobs = client.list_run_jobs(id).await?;

    if jobs.is_empty() {
        println!("{}", format!("No jobs found for run {}.", id).yellow());
    } else {
        println!(
            "{}",
            format!("Found {} job(s) for run {}:", jobs.len(), id).bold()
        );
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    Ok(())
}

async fn cancel_run(client: &OrchestratorClient, id: i64) -> Result<()> {
    let run = client.cancel_run(id).await?;

    println!("{}", format!("✓ Run {} canceled", run.id).green().bold());
    println!("  Status: {}", colorize_status(run.status));

    Ok(())
}

async fn deploy_run(client: &OrchestratorClient, id: i64) -> Result<()> {
    let job = client.deploy_run(id).await?;

    println!("{}", "✓ Deploy job queued".green().bold());
    println!();
    print_job_summary(&job);
    println!(
        "{}",
        format!("Follow it with: keel job logs {} --follow", job.id).dimmed()
    );

    Ok(())
}

fn print_run_details(run: &Run) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Pipeline:  {}", run.pipeline_id.to_string().dimmed());
    println!("  Status:    {}", colorize_status(run.status));
    if let Some(sha) = &run.commit_sha {
        println!("  Commit:    {}", sha);
    }
    if let Some(git_ref) = &run.git_ref {
        println!("  Ref:       {}", git_ref);
    }
    if let Some(by) = &run.triggered_by {
        println!("  By:        {}", by);
    }
    println!("  Queued:    {}", format_time(run.queued_at));
    if let Some(started) = run.started_at {
        println!("  Started:   {}", format_time(started));
    }
    if let Some(finished) = run.finished_at {
        println!("  Finished:  {}", format_time(finished));
    }
    if let Some(secs) = duration_secs(run.started_at, run.finished_at) {
        println!("  Duration:  {}s", secs);
    }
}

fn print_run_detail(detail: &RunDetail) {
    print_run_details(&detail.run);
    println!("  Aggregate: {}", colorize_status(detail.aggregated_status));
    println!("  Jobs:      {}", format_counts(&detail.counts));

    if !detail.jobs.is_empty() {
        println!();
        for job in &detail.jobs {
            print_job_summary(job);
        }
    }
}

fn print_job_summary(job: &Job) {
    println!(
        "  {} Job {} {} {}",
        "▸".cyan(),
        job.id.to_string().bold(),
        format!("[{}]", job.stage).dimmed(),
        job.name
    );
    println!("    Status:   {}", colorize_status(job.status));
    if let Some(code) = job.exit_code {
        println!("    Exit:     {}", code);
    }
    if let Some(runner) = job.runner_id {
        println!("    Runner:   {}", runner.to_string().dimmed());
    }
    if let Some(secs) = duration_secs(job.started_at, job.finished_at) {
        println!("    Duration: {}s", secs);
    }
    println!();
}

fn format_counts(counts: &JobCounts) -> String {
    format!(
        "{} total, {} queued, {} running, {} success, {} failed, {} canceled",
        counts.total, counts.queued, counts.running, counts.success, counts.failed, counts.canceled
    )
}

//! Keel CLI
//!
//! Command-line interface for interacting with the Keel orchestrator.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel CI/CD CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "KEEL_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
    };

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use commands::{JobCommands, ProjectCommands, RunCommands};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_trigger() {
        let cli = Cli::try_parse_from([
            "keel",
            "--orchestrator-url",
            "http://ci:9000",
            "run",
            "trigger",
            "7",
            "--sha",
            "abc123",
            "--ref",
            "main",
        ])
        .unwrap();

        assert_eq!(cli.orchestrator_url, "http://ci:9000");
        match cli.command {
            Commands::Run {
                command:
                    RunCommands::Trigger {
                        pipeline_id,
                        sha,
                        git_ref,
                        ..
                    },
            } => {
                assert_eq!(pipeline_id, 7);
                assert_eq!(sha.as_deref(), Some("abc123"));
                assert_eq!(git_ref.as_deref(), Some("main"));
            }
            _ => panic!("expected run trigger"),
        }
    }

    #[test]
    fn test_parse_job_logs_follow() {
        let cli = Cli::try_parse_from(["keel", "job", "logs", "12", "-f", "--offset", "40"]).unwrap();
        match cli.command {
            Commands::Job {
                command: JobCommands::Logs { id, follow, offset },
            } => {
                assert_eq!(id, 12);
                assert!(follow);
                assert_eq!(offset, 40);
            }
            _ => panic!("expected job logs"),
        }
    }

    #[test]
    fn test_parse_project_env_pairs() {
        let cli = Cli::try_parse_from([
            "keel", "project", "create", "shop", "--env", "A=1", "--env", "B=x=y",
        ])
        .unwrap();
        match cli.command {
            Commands::Project {
                command: ProjectCommands::Create { name, env, .. },
            } => {
                assert_eq!(name, "shop");
                assert_eq!(
                    env,
                    vec![
                        ("A".to_string(), "1".to_string()),
                        ("B".to_string(), "x=y".to_string())
                    ]
                );
            }
            _ => panic!("expected project create"),
        }
    }

    #[test]
    fn test_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["keel", "run", "get", "abc"]).is_err());
    }
}

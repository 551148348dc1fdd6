//! Pipeline command handlers
//!
//! Uploads pipeline definitions from YAML files and shows them.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_client::OrchestratorClient;
use keel_core::definition::PipelineDefinition;
use keel_core::domain::Pipeline;
use keel_core::dto::project::CreatePipeline;
use std::path::Path;

use crate::config::Config;
use crate::output::{format_time, rule};

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a pipeline from a YAML definition
    Create {
        /// Project the pipeline belongs to
        #[arg(short, long)]
        project: i64,

        /// Path to the YAML definition
        #[arg(short, long)]
        file: String,

        /// Override the name from the definition
        #[arg(short, long)]
        name: Option<String>,

        /// Definition version
        #[arg(long)]
        version: Option<i32>,
    },
    /// Get pipeline details
    Get {
        /// Pipeline ID
        id: i64,

        /// Print the stored YAML
        #[arg(long)]
        yaml: bool,
    },
}

/// Handle pipeline commands
pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PipelineCommands::Create {
            project,
            file,
            name,
            version,
        } => create_pipeline(&client, project, &file, name, version).await,
        PipelineCommands::Get { id, yaml } => get_pipeline(&client, id, yaml).await,
    }
}

/// Create a pipeline from a YAML file
///
/// The definition is parsed locally first so mistakes surface before upload.
async fn create_pipeline(
    client: &OrchestratorClient,
    project_id: i64,
    file: &str,
    name: Option<String>,
    version: Option<i32>,
) -> Result<()> {
    let yaml = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read pipeline file: {}", file))?;

    let definition = PipelineDefinition::from_yaml(&yaml)
        .with_context(|| format!("Invalid pipeline definition in {}", file))?;

    let name = pipeline_name(name, &definition, file);
    let steps = definition.resolve();

    let pipeline = client
        .create_pipeline(
            project_id,
            &CreatePipeline {
                name,
                yaml,
                version,
            },
        )
        .await?;

    println!("{}", "✓ Pipeline created".green().bold());
    println!();
    print_pipeline_details(&pipeline);
    println!("  Steps:    {}", steps.len());
    for step in &steps {
        println!(
            "    {} {} {}",
            "▸".cyan(),
            format!("[{}]", step.stage).dimmed(),
            step.name
        );
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: i64, show_yaml: bool) -> Result<()> {
    let pipeline = client.get_pipeline(id).await?;

    print_pipeline_details(&pipeline);

    if show_yaml {
        println!();
        println!("{}", rule());
        println!("{}", pipeline.yaml.trim_end());
        println!("{}", rule());
    } else if let Ok(definition) = pipeline.definition() {
        println!("  Steps:    {}", definition.resolve().len());
    } else {
        println!("  Steps:    {}", "definition does not parse".red());
    }

    Ok(())
}

/// Name precedence: flag, then the definition's own name, then the file stem
fn pipeline_name(flag: Option<String>, definition: &PipelineDefinition, file: &str) -> String {
    flag.or_else(|| definition.name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            Path::new(file)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "pipeline".to_string())
        })
}

fn print_pipeline_details(pipeline: &Pipeline) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:       {}", pipeline.id.to_string().cyan());
    println!("  Project:  {}", pipeline.project_id.to_string().dimmed());
    println!("  Name:     {}", pipeline.name);
    println!("  Version:  {}", pipeline.version);
    println!("  Created:  {}", format_time(pipeline.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_name_prefers_flag() {
        let definition = PipelineDefinition {
            name: Some("from-yaml".to_string()),
            ..Default::default()
        };
        assert_eq!(
            pipeline_name(Some("cli".to_string()), &definition, "ci.yml"),
            "cli"
        );
        assert_eq!(pipeline_name(None, &definition, "ci.yml"), "from-yaml");
    }

    #[test]
    fn test_pipeline_name_falls_back_to_file_stem() {
        let definition = PipelineDefinition::default();
        assert_eq!(
            pipeline_name(None, &definition, "pipelines/release.yaml"),
            "release"
        );
    }
}

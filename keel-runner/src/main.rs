//! Keel Runner
//!
//! A stateless execution agent that runs pipeline jobs in Docker sandboxes.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: The orchestrator as seen by the runner (heartbeat, claim, logs, finish)
//! - Services: Sandbox planning, execution and log buffering
//! - Scheduler: The agent loop, one job at a time
//!
//! The runner waits for the orchestrator, then repeatedly claims the oldest
//! queued job, runs it in a fresh container and streams its output back.

mod config;
mod repository;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::ControlPlane;
use crate::scheduler::Agent;
use crate::service::{DockerSandbox, ExecutionService, Sandbox};
use keel_client::OrchestratorClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_name={}, orchestrator_url={}",
        config.runner_name, config.orchestrator_url
    );

    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let control: Arc<dyn ControlPlane> =
        Arc::new(OrchestratorClient::with_client(config.orchestrator_url.clone(), http));

    let sandbox: Arc<dyn Sandbox> = Arc::new(DockerSandbox::connect()?);
    info!("Connected to Docker");

    let executor = ExecutionService::new(
        control.clone(),
        sandbox,
        config.default_image.clone(),
        config.log_flush_interval,
    );
    let agent = Agent::new(config, control, executor);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    agent.run(cancel).await
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config from environment ({:#}), using defaults", e);
            Config::default()
        }
    };

    config.validate()?;
    Ok(config)
}

/// Cancel the agent on SIGINT or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested, finishing current job");
    cancel.cancel();
}

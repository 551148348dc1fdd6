//! Keel Orchestrator
//!
//! Control plane of the CI/CD system. It stores projects, pipelines, runs
//! and jobs, hands queued jobs to execution agents, aggregates run status
//! and keeps the job logs that observers read and stream.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use config::{Config, StoreBackend};
use repository::{MemoryStore, PgStore, Store};
use service::lease::LeaseReaper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Keel Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(&config.database_url).await?;
            tracing::info!("Database connection pool created");

            db::run_migrations(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    tokio::fs::create_dir_all(&config.log_dir).await?;
    tracing::info!("Job logs stored in {}", config.log_dir.display());

    let reaper = if config.reaper_enabled() {
        LeaseReaper::new(store.clone(), config.runner_lease, config.reaper_interval).spawn()
    } else {
        tracing::info!("Lease reaper disabled");
        CancellationToken::new()
    };

    let addr = config.bind_addr.clone();
    let app = api::create_router(api::AppState::new(store, config));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reaper))
        .await?;

    tracing::info!("Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal(reaper: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutdown signal received");
    reaper.cancel();
}

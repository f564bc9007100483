//! dbops Daemon - drives operations requests to completion
//!
//! The daemon provides:
//! - An in-memory resource store, optionally seeded from a JSON file
//! - The operations engine with simulated handlers for every type
//! - A reconciliation loop stepping each request until it is terminal
//! - Request events as structured log lines

use anyhow::Context;
use clap::Parser;
use dbops_daemon::{
    simulated_registry, spawn_event_logger, DaemonConfig, Scheduler, SeedData,
};
use dbops_engine::OpsManager;
use dbops_store::InMemoryResourceStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dbops Daemon CLI
#[derive(Parser)]
#[command(name = "dbopsd")]
#[command(about = "dbops Daemon - Operations request lifecycle engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DBOPS_CONFIG")]
    config: Option<String>,

    /// JSON file with clusters and requests to load at startup
    #[arg(short, long, env = "DBOPS_SEED")]
    seed: Option<PathBuf>,

    /// Only drive requests in this namespace
    #[arg(short, long, env = "DBOPS_NAMESPACE")]
    namespace: Option<String>,

    /// Log level
    #[arg(long, env = "DBOPS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DBOPS_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if cli.namespace.is_some() {
        config.scheduler.namespace = cli.namespace;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let store = Arc::new(InMemoryResourceStore::new());
    if let Some(path) = &cli.seed {
        SeedData::from_file(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?
            .apply(store.as_ref())
            .await
            .context("failed to load seed data")?;
    }

    let registry = simulated_registry(&config.simulation).context("failed to build registry")?;
    tracing::info!(
        types = ?registry.supported_types(),
        "Operation types registered"
    );
    let manager = Arc::new(OpsManager::new(
        store,
        Arc::new(registry),
        config.engine.clone(),
    ));
    let _event_logger = spawn_event_logger(manager.events());

    let (scheduler, reconcile_rx) = Scheduler::new(config.scheduler.clone(), manager);
    let loop_handle = tokio::spawn(scheduler.clone().start(reconcile_rx));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dbopsd started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    scheduler.trigger_reconcile().await;
    loop_handle.await.context("scheduler task failed")?;
    Ok(())
}

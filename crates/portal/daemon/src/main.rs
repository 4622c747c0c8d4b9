//! portald - vendor portal automation daemon
//!
//! Loads configuration, seeds the allowlist and portal configs, and runs the
//! worker pool until Ctrl-C. Ships with the simulated browser driver; a real
//! driver plugs in through `BrowserDriver`.

use anyhow::Context;
use clap::Parser;
use portal_daemon::{build_engine, DaemonConfig};
use portal_engine::{SimulatedBrowser, WorkerPool};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Portal automation daemon CLI
#[derive(Parser)]
#[command(name = "portald")]
#[command(about = "Vendor portal automation daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PORTAL_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the config file)
    #[arg(long, env = "PORTAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "PORTAL_LOG_JSON")]
    json: bool,

    /// Worker pool size (overrides the config file)
    #[arg(short, long, env = "PORTAL_WORKERS")]
    workers: Option<usize>,

    /// Seed the demo tenant, portals and credentials
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.dev {
        DaemonConfig::development()
    } else {
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(workers) = cli.workers {
        config.engine.scheduler.worker_pool_size = workers;
    }

    init_tracing(&config);

    let engine = build_engine(&config, Arc::new(SimulatedBrowser::new())).await?;
    let pool = WorkerPool::new(engine);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = pool.size(),
        "portald started"
    );

    let cancel = CancellationToken::new();
    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
            }
            cancel.cancel();
        })
    };

    pool.run(cancel).await;
    shutdown.abort();
    tracing::info!("portald stopped");
    Ok(())
}

fn init_tracing(config: &DaemonConfig) {
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
}

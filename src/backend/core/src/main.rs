//! jobq scheduler - main entry point
//!
//! Polls the job store, dispatches due jobs to their handlers and archives
//! resolved jobs until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use jobq_core::{
    config::Config,
    db::Database,
    jobs::{HttpDispatchClient, JobScheduler, JobService, PgJobStore, SchedulerSettings},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("JOBQ_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config file {}", path))?,
        Err(_) => Config::load().context("Failed to load config from JOBQ__* environment")?,
    };

    telemetry::init_telemetry(
        &config.observability.logging(),
        &config.observability.metrics(),
    )?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting jobq scheduler");

    // Connect to database
    let db = Database::connect(&config.database).await?;
    let latency = db.ping().await?;
    tracing::info!(latency_ms = latency.as_millis() as u64, "Connected to database");

    if config.database.run_migrations {
        db.migrate().await?;
    }

    let service = Arc::new(JobService::new(Arc::new(PgJobStore::from_database(&db))));
    let client = Arc::new(HttpDispatchClient::new(config.dispatch.request_timeout)?);
    let scheduler = Arc::new(JobScheduler::new(
        service,
        client,
        SchedulerSettings::from(&config),
    ));

    tracing::info!(
        base_url = %scheduler.settings().base_url,
        batch_size = scheduler.settings().batch_size,
        "Dispatching to handlers"
    );

    let handle = scheduler.start();
    shutdown_signal().await;
    handle.stop().await;

    db.pool().close().await;
    tracing::info!("Scheduler shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

//! Payrun Worker - Main entry point

use anyhow::Result;
use payrun_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use payrun_worker::{Config, Notifier, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("payrun-worker".to_string())
        .filter_directives("payrun_worker=debug,sqlx=info".to_string())
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting Payrun worker");

    let config = Config::load()?;
    info!(worker_id = %config.worker.worker_id, "Configuration loaded");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let notifier = Arc::new(Notifier::new(&config.notifier)?);
    let worker = Worker::new(db_pool, notifier, &config);

    // Cooperative shutdown: flip the flag on ctrl-c, the loop stops
    // between iterations.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await?;

    info!("Payrun worker shut down cleanly");
    Ok(())
}

//! CLI command implementations
//!
//! Each command group has its own module with `run`-style functions.

pub mod connections;
pub mod enqueue;
pub mod progress;

use anyhow::{Context, Result};
use conduit_server::config::DatabaseConfig;
use conduit_server::ingest::{orchestrator, IngestConfig, JobProducer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Producer bound to the configured job queue
///
/// Unlike the worker, the CLI never falls back to an in-process queue: a
/// message sent there would be lost when the command exits.
pub async fn producer() -> Result<Arc<JobProducer>> {
    let config = IngestConfig::from_env()?;
    if config.job_queue_url.is_none() {
        anyhow::bail!("INGEST_JOB_QUEUE_URL must be set to enqueue jobs");
    }
    let queue = orchestrator::job_queue(&config).await;
    Ok(Arc::new(JobProducer::new(queue, orchestrator::lane_router(&config))))
}

pub async fn database() -> Result<Arc<PgPool>> {
    let config = DatabaseConfig::from_env();
    config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.min(2))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(pool))
}

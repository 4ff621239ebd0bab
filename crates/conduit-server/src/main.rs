//! Conduit worker - main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use conduit_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use conduit_server::{
    config::Config,
    features,
    ingest::{
        framework::{cursor::PgCursorStore, progress::PgProgressCounters},
        IngestConfig, IngestOrchestrator,
    },
    middleware,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("conduit-worker")
        .filter_directives("conduit_server=debug,tower_http=debug,sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Conduit worker");

    let config = Config::load()?;
    let ingest_config = IngestConfig::from_env()?;
    info!(
        "Configuration loaded - status API will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let db = Arc::new(db_pool.clone());
    let shutdown = CancellationToken::new();

    let orchestrator = IngestOrchestrator::connect(ingest_config, db.clone()).await?;
    let workers = orchestrator.start(shutdown.clone());

    let status_state = features::StatusState {
        counters: Arc::new(PgProgressCounters::new(db.clone())),
        cursors: Arc::new(PgCursorStore::new(db)),
    };
    let app = create_router(db_pool, status_state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Status API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The server can also stop on its own; make sure the workers follow
    shutdown.cancel();

    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for workers to stop", drain.as_secs());
    if tokio::time::timeout(drain, futures::future::join_all(workers))
        .await
        .is_err()
    {
        tracing::warn!("Workers did not stop within the shutdown timeout");
    }

    info!("Worker shut down gracefully");

    Ok(())
}

/// Create the router with health and status routes
fn create_router(db: sqlx::PgPool, status: features::StatusState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
        .nest("/api/v1", features::router(status))
        .layer(middleware::tracing_layer())
}

/// Health check handler
async fn health_check(State(db): State<sqlx::PgPool>) -> Result<Response, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

/// Resolves on Ctrl+C or SIGTERM and cancels `shutdown`
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
        _ = shutdown.cancelled() => {},
    }

    shutdown.cancel();
}

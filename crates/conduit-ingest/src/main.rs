//! Conduit Ingest - operator command line

use clap::Parser;
use conduit_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use conduit_ingest::{commands, Cli, Commands};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("conduit-ingest")
        .build();

    // An explicit LOG_LEVEL hands logging over to the LOG_* variables
    let log_config = if std::env::var_os("LOG_LEVEL").is_some() {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Backfill {
            target,
            entity_types,
            modified_since,
            suppress_notification,
        } => {
            commands::enqueue::backfill(&target, &entity_types, modified_since, suppress_notification)
                .await
        },
        Commands::Incremental {
            target,
            check_count,
        } => commands::enqueue::incremental(&target, check_count).await,
        Commands::Prune { target } => commands::enqueue::prune(&target).await,
        Commands::DeleteTenant { target, yes } => commands::enqueue::delete_tenant(&target, yes).await,
        Commands::Connect {
            target,
            suppress_notification,
        } => commands::connections::connect(&target, suppress_notification).await,
        Commands::Disconnect { target } => commands::connections::disconnect(&target).await,
        Commands::IndexDone {
            target,
            backfill_id,
            count,
        } => commands::enqueue::index_done(&target, backfill_id, count).await,
        Commands::Progress {
            tenant,
            backfill_id,
            limit,
        } => commands::progress::run(&tenant, backfill_id, limit).await,
    }
}

//! Conduit Ingest Library
//!
//! Operator command line for the Conduit orchestration core.
//!
//! # Overview
//!
//! - **Backfills**: start a full backfill for a tenant's source (`backfill`)
//! - **Polling**: enqueue an incremental poll (`incremental`)
//! - **Maintenance**: prune stale documents or delete a tenant's data
//!   (`prune`, `delete-tenant`)
//! - **Connections**: enable or disable a source (`connect`, `disconnect`)
//! - **Progress**: inspect backfill counters (`progress`) and report finished
//!   index jobs (`index-done`)
//!
//! Commands that enqueue work need `INGEST_JOB_QUEUE_URL`; commands that
//! read or write state need `DATABASE_URL`.

pub mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use conduit_common::types::{BackfillId, Source, TenantId};

/// Conduit - backfill and incremental sync operator tool
#[derive(Parser, Debug)]
#[command(name = "conduit-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Tenant and source a command applies to
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Tenant identifier
    #[arg(short, long)]
    pub tenant: TenantId,

    /// Source connector (http_feed, local_dir)
    #[arg(short, long)]
    pub source: Source,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a full backfill
    Backfill {
        #[command(flatten)]
        target: Target,

        /// Only sync these entity types (repeatable)
        #[arg(long = "entity-type")]
        entity_types: Vec<String>,

        /// Only sync items modified at or after this RFC 3339 time
        #[arg(long)]
        modified_since: Option<DateTime<Utc>>,

        /// Do not send the completion notification
        #[arg(long)]
        suppress_notification: bool,
    },

    /// Enqueue an incremental poll
    Incremental {
        #[command(flatten)]
        target: Target,

        /// Most items to scan
        #[arg(short, long, default_value_t = conduit_server::ingest::config::DEFAULT_CHECK_COUNT)]
        check_count: usize,
    },

    /// Enqueue a prune pass
    Prune {
        #[command(flatten)]
        target: Target,
    },

    /// Delete every indexed document of the tenant for this source
    DeleteTenant {
        #[command(flatten)]
        target: Target,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Enable a source and start its first backfill
    Connect {
        #[command(flatten)]
        target: Target,

        /// Do not send the completion notification
        #[arg(long)]
        suppress_notification: bool,
    },

    /// Disable a source and clear its cursors
    Disconnect {
        #[command(flatten)]
        target: Target,
    },

    /// Report index jobs finished for a backfill
    IndexDone {
        #[command(flatten)]
        target: Target,

        #[arg(short, long)]
        backfill_id: BackfillId,

        /// Number of index jobs finished
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },

    /// Show backfill progress
    Progress {
        /// Tenant identifier
        #[arg(short, long)]
        tenant: TenantId,

        /// Show a single backfill instead of the most recent ones
        #[arg(short, long)]
        backfill_id: Option<BackfillId>,

        /// Limit number of backfills to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

//! Conduit Server Library
#![recursion_limit = "256"]
//!
//! Backfill and incremental sync orchestration for multi-tenant connectors.
//!
//! # Overview
//!
//! - **Ingest**: job queue, lanes, extractors, progress counters, cursors and
//!   the pruner
//! - **Features**: read-only status API over backfill progress and cursors
//! - **Configuration**: environment-based server and database settings
//! - **Middleware**: request tracing
//!
//! # Architecture
//!
//! A root job discovers every item for a `(tenant, source)` and fans out
//! batched child jobs onto FIFO lanes. Children persist artifacts, trigger
//! indexing and report into per-backfill counters. The backfill completes when
//! the counters say so, with no coordinator watching the children.
//!
//! ```text
//! producer ──▶ queue (lanes) ──▶ consumer ──▶ runner ──▶ connector
//!                                               │
//!                                               ├──▶ artifact store
//!                                               ├──▶ progress counters
//!                                               └──▶ sync cursors
//! ```
//!
//! # Example
//!
//! ```no_run
//! use conduit_server::ingest::{IngestConfig, JobProducer, LaneRouter};
//! use conduit_server::ingest::queue::memory::MemoryJobQueue;
//! use conduit_common::types::{Source, TenantId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let queue = Arc::new(MemoryJobQueue::new(config.visibility_timeout()));
//!     let producer = JobProducer::new(queue, LaneRouter::new(config.webhook_lanes, config.backfill_lanes));
//!     producer
//!         .enqueue_root(&TenantId::parse("acme")?, Source::HttpFeed, None, false)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

// Re-export commonly used types
pub use error::AppError;

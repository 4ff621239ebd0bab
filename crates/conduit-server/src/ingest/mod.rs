//! Backfill and incremental sync orchestration
//!
//! # Architecture
//!
//! - **framework**: source-agnostic core (extractors, counters, cursors, pruning)
//! - **connectors**: bundled connectors and the source registry
//! - **jobs**: job message schema
//! - **lanes** / **schedule**: lane routing and start-time gating
//! - **queue**: FIFO job queue transport (SQS and in-memory)
//! - **producer** / **consumer** / **runner**: sending, receiving and running jobs
//! - **connections** / **scheduler**: per-tenant source connections and periodic jobs
//! - **orchestrator**: wiring and background tasks for the worker binary

pub mod config;
pub mod connections;
pub mod connectors;
pub mod consumer;
pub mod framework;
pub mod jobs;
pub mod lanes;
pub mod orchestrator;
pub mod producer;
pub mod queue;
pub mod runner;
pub mod schedule;
pub mod scheduler;

pub use config::IngestConfig;
pub use connections::{ConnectionManager, ConnectionStore, MemoryConnectionStore, PgConnectionStore};
pub use connectors::ConnectorRegistry;
pub use consumer::{Disposition, JobConsumer};
pub use jobs::{BackfillJob, JobTask};
pub use lanes::{JobKind, LaneRouter};
pub use orchestrator::IngestOrchestrator;
pub use producer::JobProducer;
pub use runner::{Backends, JobRunner, RunnerSettings};
pub use scheduler::PeriodicScheduler;

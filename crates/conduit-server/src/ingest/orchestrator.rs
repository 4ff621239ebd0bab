//! Ingestion orchestrator
//!
//! Wires queues, stores and connectors together and runs the consumer and the
//! periodic scheduler as background tasks.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::{IngestConfig, DEFAULT_HTTP_TIMEOUT_SECS};
use super::connections::{ConnectionStore, PgConnectionStore};
use super::connectors::ConnectorRegistry;
use super::consumer::JobConsumer;
use super::framework::cursor::PgCursorStore;
use super::framework::documents::PgDocumentStore;
use super::framework::indexing::QueueIndexingTrigger;
use super::framework::memory::MemorySearchIndex;
use super::framework::progress::{LogNotifier, PgProgressCounters};
use super::framework::search::{HttpSearchIndex, SearchIndex};
use super::framework::storage::PgArtifactStore;
use super::lanes::LaneRouter;
use super::producer::JobProducer;
use super::queue::{JobQueue, MemoryJobQueue, SqsJobQueue};
use super::runner::{Backends, JobRunner, RunnerSettings};
use super::scheduler::PeriodicScheduler;

/// Job queue named by `INGEST_JOB_QUEUE_URL`, or an in-process queue when unset
pub async fn job_queue(config: &IngestConfig) -> Arc<dyn JobQueue> {
    match &config.job_queue_url {
        Some(url) => {
            info!(queue_url = %url, "Using SQS job queue");
            Arc::new(SqsJobQueue::from_env(url.clone()).await)
        },
        None => {
            warn!("INGEST_JOB_QUEUE_URL not set, using in-memory job queue");
            Arc::new(MemoryJobQueue::new(config.visibility_timeout()))
        },
    }
}

/// Queue that receives index requests; falls back to the job queue
pub async fn index_queue(config: &IngestConfig, job_queue: &Arc<dyn JobQueue>) -> Arc<dyn JobQueue> {
    match &config.index_queue_url {
        Some(url) => {
            info!(queue_url = %url, "Using SQS index queue");
            Arc::new(SqsJobQueue::from_env(url.clone()).await)
        },
        None => job_queue.clone(),
    }
}

/// Search index named by `INGEST_SEARCH_INDEX_URL`
///
/// An in-memory index is only accepted alongside the in-memory job queue; a
/// worker on a shared queue must reach the real index.
pub fn search_index(config: &IngestConfig) -> Result<Arc<dyn SearchIndex>> {
    if config.job_queue_url.is_some() && config.search_index_url.is_none() {
        anyhow::bail!("INGEST_SEARCH_INDEX_URL is required when INGEST_JOB_QUEUE_URL is set");
    }
    match &config.search_index_url {
        Some(url) => Ok(Arc::new(HttpSearchIndex::new(
            url.clone(),
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        )?)),
        None => {
            warn!("INGEST_SEARCH_INDEX_URL not set, search updates stay in memory");
            Ok(Arc::new(MemorySearchIndex::new()))
        },
    }
}

/// PostgreSQL-backed stores
pub fn pg_backends(
    db: Arc<PgPool>,
    search: Arc<dyn SearchIndex>,
    index_queue: Arc<dyn JobQueue>,
    lanes: LaneRouter,
) -> Backends {
    Backends {
        artifacts: Arc::new(PgArtifactStore::new(db.clone())),
        counters: Arc::new(PgProgressCounters::new(db.clone())),
        cursors: Arc::new(PgCursorStore::new(db.clone())),
        documents: Arc::new(PgDocumentStore::new(db)),
        search,
        indexing: Arc::new(QueueIndexingTrigger::new(index_queue, lanes)),
        notifier: Arc::new(LogNotifier),
    }
}

pub fn lane_router(config: &IngestConfig) -> LaneRouter {
    LaneRouter::new(config.webhook_lanes, config.backfill_lanes)
}

/// Consumer plus scheduler over one job queue
pub struct IngestOrchestrator {
    config: IngestConfig,
    queue: Arc<dyn JobQueue>,
    producer: Arc<JobProducer>,
    runner: Arc<JobRunner>,
    connections: Arc<dyn ConnectionStore>,
}

impl IngestOrchestrator {
    /// Build against PostgreSQL and the configured queues
    pub async fn connect(config: IngestConfig, db: Arc<PgPool>) -> Result<Self> {
        let lanes = lane_router(&config);
        let queue = job_queue(&config).await;
        let index_queue = index_queue(&config, &queue).await;
        let backends = pg_backends(db.clone(), search_index(&config)?, index_queue, lanes);
        let registry = ConnectorRegistry::from_config(&config)?;
        let connections: Arc<dyn ConnectionStore> = Arc::new(PgConnectionStore::new(db));

        Ok(Self::from_parts(config, queue, backends, connections, registry))
    }

    pub fn from_parts(
        config: IngestConfig,
        queue: Arc<dyn JobQueue>,
        backends: Backends,
        connections: Arc<dyn ConnectionStore>,
        registry: ConnectorRegistry,
    ) -> Self {
        let producer = Arc::new(JobProducer::new(queue.clone(), lane_router(&config)));
        let runner = Arc::new(JobRunner::new(
            registry,
            backends,
            producer.clone(),
            RunnerSettings::from(&config),
        ));

        Self {
            config,
            queue,
            producer,
            runner,
            connections,
        }
    }

    pub fn producer(&self) -> Arc<JobProducer> {
        self.producer.clone()
    }

    pub fn consumer(&self) -> JobConsumer {
        JobConsumer::new(
            self.queue.clone(),
            self.runner.clone(),
            self.config.concurrency,
            self.config.receive_batch,
        )
    }

    /// Spawn the consumer and, when enabled, the periodic scheduler
    pub fn start(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let consumer = self.consumer();
        let consumer_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move { consumer.run(consumer_shutdown).await }));

        if self.config.scheduler_enabled {
            let scheduler =
                PeriodicScheduler::new(self.connections.clone(), self.producer.clone(), &self.config);
            handles.push(scheduler.start(shutdown));
        } else {
            info!("Periodic scheduler disabled (INGEST_SCHEDULER_ENABLED=false)");
        }

        info!("Ingestion orchestrator started");
        handles
    }
}

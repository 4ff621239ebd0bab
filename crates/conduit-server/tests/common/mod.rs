//! Shared fixtures for Conduit integration tests
//!
//! Everything runs against the in-memory backends and queue, so no database
//! or AWS account is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{EntityType, Source, TenantId};
use conduit_server::ingest::framework::connector::{Connector, ConnectorError, ConnectorResult};
use conduit_server::ingest::framework::memory::{
    MemoryArtifactStore, MemoryCursorStore, MemoryDocumentStore, MemoryProgressCounters,
    MemorySearchIndex, RecordingIndexingTrigger, RecordingNotifier,
};
use conduit_server::ingest::framework::types::{Artifact, ArtifactMetadata, ItemPage, ItemRef, JobContext, ListOrder};
use conduit_server::ingest::queue::{JobQueue, MemoryJobQueue};
use conduit_server::ingest::{
    Backends, BackfillJob, ConnectorRegistry, JobConsumer, JobProducer, JobRunner, LaneRouter,
    RunnerSettings,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Items per listing page served by [`FixtureConnector`]
pub const PAGE_SIZE: usize = 20;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,conduit_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn tenant() -> TenantId {
    TenantId::parse("acme").unwrap()
}

pub fn doc_type() -> EntityType {
    EntityType::parse("document").unwrap()
}

pub fn item(id: impl Into<String>) -> ItemRef {
    ItemRef::new(id, doc_type())
}

/// `count` items named `item-000`, `item-001`, ...
pub fn items(count: usize) -> Vec<ItemRef> {
    (0..count).map(|i| item(format!("item-{:03}", i))).collect()
}

/// Provider with a fixed item list
///
/// Ids in `transient` fail with a retryable error; ids in `unreachable` fail
/// the whole job.
pub struct FixtureConnector {
    items: Mutex<Vec<ItemRef>>,
    transient: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    batch_size: usize,
    per_batch_delay: Duration,
}

impl FixtureConnector {
    pub fn new(items: Vec<ItemRef>) -> Self {
        Self {
            items: Mutex::new(items),
            transient: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(HashSet::new()),
            batch_size: 50,
            per_batch_delay: Duration::from_secs(30),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_per_batch_delay(mut self, delay: Duration) -> Self {
        self.per_batch_delay = delay;
        self
    }

    pub fn set_items(&self, items: Vec<ItemRef>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fail_transiently(&self, id: &str) {
        self.transient.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_fatally(&self, id: &str) {
        self.unreachable.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl Connector for FixtureConnector {
    fn source(&self) -> Source {
        Source::HttpFeed
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn per_batch_delay(&self) -> Duration {
        self.per_batch_delay
    }

    async fn list_page(
        &self,
        _ctx: &JobContext,
        page_token: Option<&str>,
        order: ListOrder,
    ) -> ConnectorResult<ItemPage> {
        let mut all = self.items.lock().unwrap().clone();
        if order == ListOrder::RecentlyModified {
            all.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        }

        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ConnectorError::Malformed(format!("bad token {}", token)))?,
            None => 0,
        };
        let end = (offset + PAGE_SIZE).min(all.len());
        let items = all.get(offset..end).map(<[ItemRef]>::to_vec).unwrap_or_default();
        let next_page_token = (end < all.len()).then(|| end.to_string());

        Ok(ItemPage {
            items,
            next_page_token,
        })
    }

    async fn fetch_detail(&self, _ctx: &JobContext, item: &ItemRef) -> ConnectorResult<Value> {
        if self.unreachable.lock().unwrap().contains(&item.id) {
            return Err(ConnectorError::Unreachable("provider is down".to_string()));
        }
        if self.transient.lock().unwrap().contains(&item.id) {
            return Err(ConnectorError::Transient(format!("429 for {}", item.id)));
        }
        Ok(json!({ "id": item.id, "title": format!("Title {}", item.id) }))
    }

    fn transform(
        &self,
        ctx: &JobContext,
        item: &ItemRef,
        detail: Value,
    ) -> ConnectorResult<Artifact> {
        Ok(Artifact {
            tenant_id: ctx.tenant_id.clone(),
            source: ctx.source,
            entity_type: item.entity_type.clone(),
            entity_id: item.id.clone(),
            metadata: ArtifactMetadata {
                title: detail["title"].as_str().map(str::to_string),
                ..Default::default()
            },
            content: detail,
            source_updated_at: item.modified_at,
            ingest_job_id: ctx.job_id,
        })
    }
}

/// Runner, producer and consumer over in-memory backends
pub struct Harness {
    pub connector: Arc<FixtureConnector>,
    pub queue: Arc<MemoryJobQueue>,
    pub producer: Arc<JobProducer>,
    pub runner: Arc<JobRunner>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub counters: Arc<MemoryProgressCounters>,
    pub cursors: Arc<MemoryCursorStore>,
    pub documents: Arc<MemoryDocumentStore>,
    pub search: Arc<MemorySearchIndex>,
    pub indexing: Arc<RecordingIndexingTrigger>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(connector: FixtureConnector) -> Self {
        Self::with_settings(
            connector,
            RunnerSettings {
                index_batch_size: 50,
                prune_threshold: 0.7,
            },
        )
    }

    pub fn with_settings(connector: FixtureConnector, settings: RunnerSettings) -> Self {
        init_tracing();

        let connector = Arc::new(connector);
        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(300)));
        let producer = Arc::new(JobProducer::new(queue.clone(), LaneRouter::new(8, 4)));

        let artifacts = Arc::new(MemoryArtifactStore::new());
        let counters = Arc::new(MemoryProgressCounters::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let search = Arc::new(MemorySearchIndex::new());
        let indexing = Arc::new(RecordingIndexingTrigger::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let mut registry = ConnectorRegistry::new();
        registry.register(connector.clone());

        let backends = Backends {
            artifacts: artifacts.clone(),
            counters: counters.clone(),
            cursors: cursors.clone(),
            documents: documents.clone(),
            search: search.clone(),
            indexing: indexing.clone(),
            notifier: notifier.clone(),
        };
        let runner = Arc::new(JobRunner::new(registry, backends, producer.clone(), settings));

        Self {
            connector,
            queue,
            producer,
            runner,
            artifacts,
            counters,
            cursors,
            documents,
            search,
            indexing,
            notifier,
        }
    }

    pub fn consumer(&self) -> JobConsumer {
        let queue: Arc<dyn JobQueue> = self.queue.clone();
        JobConsumer::new(queue, self.runner.clone(), 4, 10)
    }

    /// Jobs currently queued, decoded, in lane order
    pub async fn queued_jobs(&self) -> Vec<BackfillJob> {
        self.queue
            .snapshot()
            .await
            .into_iter()
            .map(|(_, body)| serde_json::from_str(&body).unwrap())
            .collect()
    }

    /// Queued jobs together with their lanes
    pub async fn queued_lanes(&self) -> Vec<String> {
        self.queue
            .snapshot()
            .await
            .into_iter()
            .map(|(lane, _)| lane)
            .collect()
    }

    pub async fn run(&self, job: &BackfillJob, now: DateTime<Utc>) -> anyhow::Result<conduit_server::ingest::framework::types::JobOutcome> {
        self.runner.run(job, uuid::Uuid::new_v4(), now).await
    }
}

//! Job runner
//!
//! Decodes nothing and owns no queue: given one decoded job it applies the
//! start-time gate, resolves the connector and calls the matching handler.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::IngestConfig;
use super::connectors::ConnectorRegistry;
use super::framework::coordinator::{ChildDispatcher, RootExtractor};
use super::framework::cursor::SyncCursorStore;
use super::framework::deletion::DocumentDeleter;
use super::framework::documents::DocumentStore;
use super::framework::incremental::IncrementalExtractor;
use super::framework::indexing::IndexingTrigger;
use super::framework::progress::{BackfillNotifier, BackfillTracker, ProgressCounters};
use super::framework::pruner::Pruner;
use super::framework::search::SearchIndex;
use super::framework::storage::ArtifactStore;
use super::framework::types::{JobOutcome, JobSummary};
use super::framework::worker::BatchWorker;
use super::jobs::{BackfillJob, JobTask};
use super::schedule::{gate, Dispatch};

/// Stores and collaborators the handlers run against
#[derive(Clone)]
pub struct Backends {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub counters: Arc<dyn ProgressCounters>,
    pub cursors: Arc<dyn SyncCursorStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub search: Arc<dyn SearchIndex>,
    pub indexing: Arc<dyn IndexingTrigger>,
    pub notifier: Arc<dyn BackfillNotifier>,
}

/// Tunables the handlers need
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerSettings {
    pub index_batch_size: usize,
    pub prune_threshold: f64,
}

impl From<&IngestConfig> for RunnerSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            index_batch_size: config.index_batch_size,
            prune_threshold: config.prune_threshold,
        }
    }
}

pub struct JobRunner {
    registry: ConnectorRegistry,
    tracker: Arc<BackfillTracker>,
    root: RootExtractor,
    batch: BatchWorker,
    incremental: IncrementalExtractor,
    pruner: Pruner,
}

impl JobRunner {
    pub fn new(
        registry: ConnectorRegistry,
        backends: Backends,
        children: Arc<dyn ChildDispatcher>,
        settings: RunnerSettings,
    ) -> Self {
        let tracker = Arc::new(BackfillTracker::new(
            backends.counters.clone(),
            backends.cursors.clone(),
            backends.notifier.clone(),
        ));
        let deleter = Arc::new(DocumentDeleter::new(
            backends.artifacts.clone(),
            backends.documents.clone(),
            backends.search.clone(),
        ));

        Self {
            root: RootExtractor::new(tracker.clone(), backends.cursors.clone(), children),
            batch: BatchWorker::new(
                backends.artifacts.clone(),
                backends.indexing.clone(),
                tracker.clone(),
                settings.index_batch_size,
            ),
            incremental: IncrementalExtractor::new(
                backends.artifacts.clone(),
                backends.cursors.clone(),
                backends.indexing.clone(),
                settings.index_batch_size,
            ),
            pruner: Pruner::new(deleter, backends.cursors, settings.prune_threshold),
            registry,
            tracker,
        }
    }

    /// Run one delivery of `job`
    ///
    /// A job whose start time has not arrived is rescheduled before anything
    /// else happens, so the early delivery has no side effects.
    #[instrument(skip_all, fields(
        tenant_id = %job.tenant_id,
        source = %job.source,
        task = job.task.name(),
        job_id = %job_id,
    ))]
    pub async fn run(&self, job: &BackfillJob, job_id: Uuid, now: DateTime<Utc>) -> Result<JobOutcome> {
        if let Dispatch::RescheduleAfter(delay) = gate(job.start_timestamp, now) {
            info!(delay_secs = delay.as_secs(), "Job not yet due, rescheduling");
            return Ok(JobOutcome::RescheduleAfter(delay));
        }

        let ctx = job.context(job_id);

        let summary = match &job.task {
            JobTask::Root { filter } => {
                let connector = self.registry.get(job.source)?;
                JobSummary::Root(
                    self.root
                        .run(connector.as_ref(), &ctx, filter.as_ref(), now)
                        .await?,
                )
            },
            JobTask::Batch { items, .. } => {
                let connector = self.registry.get(job.source)?;
                JobSummary::Batch(self.batch.run(connector.as_ref(), &ctx, items).await?)
            },
            JobTask::Incremental { check_count } => {
                let connector = self.registry.get(job.source)?;
                JobSummary::Incremental(
                    self.incremental
                        .run(connector.as_ref(), &ctx, *check_count, now)
                        .await?,
                )
            },
            JobTask::Prune => {
                let connector = self.registry.get(job.source)?;
                JobSummary::Prune(self.pruner.prune(connector.as_ref(), &ctx).await?)
            },
            JobTask::DeleteTenantData => {
                JobSummary::TenantDeleted(self.pruner.delete_tenant_data(&ctx).await?)
            },
            JobTask::IndexProgress { index_jobs } => {
                self.tracker.record_index_done(&ctx, *index_jobs).await?;
                JobSummary::IndexProgress {
                    index_jobs: *index_jobs,
                }
            },
        };

        Ok(JobOutcome::Completed(summary))
    }
}

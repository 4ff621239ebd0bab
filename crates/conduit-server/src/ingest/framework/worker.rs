//! Batch extractor
//!
//! Processes one child job: fetch and transform each item independently,
//! upsert what succeeded in one write, then request indexing in bounded
//! sub-batches. Progress is recorded whatever happens.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::connector::Connector;
use super::indexing::{index_requests, IndexingTrigger};
use super::progress::BackfillTracker;
use super::storage::ArtifactStore;
use super::types::{Artifact, BatchReport, FailedItem, ItemRef, JobContext};

pub struct BatchWorker {
    artifacts: Arc<dyn ArtifactStore>,
    indexing: Arc<dyn IndexingTrigger>,
    tracker: Arc<BackfillTracker>,
    index_batch_size: usize,
}

impl BatchWorker {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        indexing: Arc<dyn IndexingTrigger>,
        tracker: Arc<BackfillTracker>,
        index_batch_size: usize,
    ) -> Self {
        Self {
            artifacts,
            indexing,
            tracker,
            index_batch_size: index_batch_size.max(1),
        }
    }

    /// Process one batch and record the attempt
    ///
    /// A fatal connector error fails the job so the queue redelivers it; the
    /// attempt is still counted.
    #[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, source = %ctx.source, items = items.len()))]
    pub async fn run(
        &self,
        connector: &dyn Connector,
        ctx: &JobContext,
        items: &[ItemRef],
    ) -> Result<BatchReport> {
        let outcome = self.process(connector, ctx, items).await;
        let succeeded = matches!(&outcome, Ok(report) if report.fully_succeeded());

        let recorded = self.tracker.record_attempt(ctx, succeeded).await;

        match (outcome, recorded) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e.context("Failed to record batch progress")),
            (Err(e), recorded) => {
                if let Err(counter_error) = recorded {
                    warn!(error = %counter_error, "Failed to record attempt of a failed batch");
                }
                Err(e)
            },
        }
    }

    async fn process(
        &self,
        connector: &dyn Connector,
        ctx: &JobContext,
        items: &[ItemRef],
    ) -> Result<BatchReport> {
        let mut built: Vec<Artifact> = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for item in items {
            let result = match connector.fetch_detail(ctx, item).await {
                Ok(detail) => connector.transform(ctx, item, detail),
                Err(e) => Err(e),
            };

            match result {
                Ok(artifact) => built.push(artifact),
                Err(e) if e.is_fatal() => {
                    return Err(anyhow!(e).context(format!("Item {} failed fatally", item.id)));
                },
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Skipping item");
                    failed.push(FailedItem {
                        id: item.id.clone(),
                        error: e.to_string(),
                    });
                },
            }
        }

        if !built.is_empty() {
            self.artifacts
                .upsert_many(&built)
                .await
                .context("Failed to store artifacts")?;
        }

        let index_requests = self.trigger_indexing(ctx, &built).await?;

        info!(
            stored = built.len(),
            failed = failed.len(),
            index_requests,
            "Batch processed"
        );

        Ok(BatchReport {
            stored: built.into_iter().map(|a| a.entity_id).collect(),
            failed,
            index_requests,
        })
    }

    /// Record planned index jobs, then trigger them
    ///
    /// If a trigger fails, the untriggered remainder is withdrawn from the
    /// plan before the error propagates, so the backfill can still complete.
    async fn trigger_indexing(&self, ctx: &JobContext, built: &[Artifact]) -> Result<usize> {
        let requests = index_requests(ctx, built, self.index_batch_size);
        let planned = requests.len();
        if planned == 0 {
            return Ok(0);
        }

        self.tracker
            .plan_index(ctx, planned as i64)
            .await
            .context("Failed to record planned index jobs")?;

        for (sent, request) in requests.into_iter().enumerate() {
            if let Err(e) = self.indexing.trigger(request).await {
                let withdrawn = (planned - sent) as i64;
                if let Err(plan_error) = self.tracker.plan_index(ctx, -withdrawn).await {
                    warn!(error = %plan_error, withdrawn, "Failed to withdraw planned index jobs");
                }
                return Err(e.context("Failed to trigger indexing"));
            }
        }

        debug!(planned, "Indexing triggered");
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::framework::connector::{ConnectorError, ConnectorResult};
    use crate::ingest::framework::memory::{
        MemoryArtifactStore, MemoryCursorStore, MemoryProgressCounters, RecordingIndexingTrigger,
        RecordingNotifier,
    };
    use crate::ingest::framework::progress::ProgressCounters;
    use crate::ingest::framework::types::{ArtifactMetadata, ItemPage, ListOrder};
    use async_trait::async_trait;
    use conduit_common::types::{BackfillId, EntityType, Source, TenantId};
    use serde_json::{json, Value};

    /// Fails items whose id starts with "bad", fatally for "down"
    struct ScriptedConnector;

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn source(&self) -> Source {
            Source::HttpFeed
        }

        async fn list_page(
            &self,
            _ctx: &JobContext,
            _page_token: Option<&str>,
            _order: ListOrder,
        ) -> ConnectorResult<ItemPage> {
            Ok(ItemPage::default())
        }

        async fn fetch_detail(&self, _ctx: &JobContext, item: &ItemRef) -> ConnectorResult<Value> {
            if item.id.starts_with("bad") {
                return Err(ConnectorError::Transient(item.id.clone()));
            }
            if item.id == "down" {
                return Err(ConnectorError::Unreachable("provider down".to_string()));
            }
            Ok(json!({ "id": item.id }))
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
                content: detail,
                metadata: ArtifactMetadata::default(),
                source_updated_at: item.modified_at,
                ingest_job_id: ctx.job_id,
            })
        }
    }

    struct Fixture {
        artifacts: Arc<MemoryArtifactStore>,
        counters: Arc<MemoryProgressCounters>,
        indexing: Arc<RecordingIndexingTrigger>,
        worker: BatchWorker,
    }

    fn fixture(index_batch_size: usize) -> Fixture {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let counters = Arc::new(MemoryProgressCounters::new());
        let indexing = Arc::new(RecordingIndexingTrigger::new());
        let tracker = Arc::new(BackfillTracker::new(
            counters.clone(),
            Arc::new(MemoryCursorStore::new()),
            Arc::new(RecordingNotifier::new()),
        ));
        let worker = BatchWorker::new(artifacts.clone(), indexing.clone(), tracker, index_batch_size);
        Fixture {
            artifacts,
            counters,
            indexing,
            worker,
        }
    }

    fn items(ids: &[&str]) -> Vec<ItemRef> {
        ids.iter()
            .map(|id| ItemRef::new(*id, EntityType::parse("doc").unwrap()))
            .collect()
    }

    fn ctx(backfill_id: BackfillId) -> JobContext {
        JobContext::new(TenantId::parse("t1").unwrap(), Source::HttpFeed).with_backfill(backfill_id)
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_batch() {
        let f = fixture(50);
        let backfill = BackfillId::new();

        let report = f
            .worker
            .run(&ScriptedConnector, &ctx(backfill), &items(&["a", "bad-1", "b"]))
            .await
            .unwrap();

        assert_eq!(report.stored, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(f.artifacts.len().await, 2);
        assert_eq!(f.indexing.entity_ids().await, vec!["a".to_string(), "b".to_string()]);

        let progress = f.counters.get(backfill, &ctx(backfill).tenant_id).await.unwrap().unwrap();
        assert_eq!(progress.attempted_ingest_jobs, 1);
        assert_eq!(progress.done_ingest_jobs, 0);
    }

    #[tokio::test]
    async fn test_index_requests_are_sub_batched_and_planned() {
        let f = fixture(2);
        let backfill = BackfillId::new();

        let report = f
            .worker
            .run(&ScriptedConnector, &ctx(backfill), &items(&["a", "b", "c", "d", "e"]))
            .await
            .unwrap();

        assert_eq!(report.index_requests, 3);
        assert_eq!(f.indexing.requests().await.len(), 3);
        let progress = f.counters.get(backfill, &ctx(backfill).tenant_id).await.unwrap().unwrap();
        assert_eq!(progress.total_index_jobs, 3);
        assert_eq!(progress.done_ingest_jobs, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_job_but_counts_attempt() {
        let f = fixture(50);
        let backfill = BackfillId::new();

        let result = f
            .worker
            .run(&ScriptedConnector, &ctx(backfill), &items(&["a", "down", "b"]))
            .await;

        assert!(result.is_err());
        assert!(f.artifacts.is_empty().await);
        let progress = f.counters.get(backfill, &ctx(backfill).tenant_id).await.unwrap().unwrap();
        assert_eq!(progress.attempted_ingest_jobs, 1);
        assert_eq!(progress.done_ingest_jobs, 0);
    }

    #[tokio::test]
    async fn test_trigger_failure_withdraws_planned_index_jobs() {
        let f = fixture(1);
        let backfill = BackfillId::new();
        f.indexing.set_failing(true);

        let result = f
            .worker
            .run(&ScriptedConnector, &ctx(backfill), &items(&["a", "b"]))
            .await;

        assert!(result.is_err());
        let progress = f.counters.get(backfill, &ctx(backfill).tenant_id).await.unwrap().unwrap();
        assert_eq!(progress.total_index_jobs, 0);
        assert_eq!(progress.attempted_ingest_jobs, 1);
    }

    #[tokio::test]
    async fn test_redelivered_batch_converges() {
        let f = fixture(50);
        let backfill = BackfillId::new();
        let batch = items(&["a", "b"]);

        f.worker.run(&ScriptedConnector, &ctx(backfill), &batch).await.unwrap();
        let first = f.artifacts.all().await.len();
        f.worker.run(&ScriptedConnector, &ctx(backfill), &batch).await.unwrap();

        assert_eq!(f.artifacts.all().await.len(), first);
    }
}

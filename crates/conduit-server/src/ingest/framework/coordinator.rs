//! Root extractor
//!
//! Discovers every item a backfill should cover, cuts it into batches and
//! fans out one child job per batch:
//! 1. Reset the full-backfill flag and move the incremental cursor to now
//! 2. Discover, then partition into `batch_size` chunks
//! 3. Record `total_ingest_jobs` before any child is sent
//! 4. Send children in start-time order

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::BackfillId;
use std::sync::Arc;
use tracing::{info, instrument};

use super::connector::Connector;
use super::cursor::{CursorKey, CursorValue, SyncCursorStore};
use super::progress::BackfillTracker;
use super::types::{DiscoveryFilter, ItemRef, JobContext, RootReport};
use crate::ingest::schedule::child_start_times;

/// One child job as planned by the root
#[derive(Debug, Clone, PartialEq)]
pub struct ChildBatch {
    /// Position in the fan-out, starting at 0
    pub index: usize,
    pub items: Vec<ItemRef>,
    pub start_timestamp: Option<DateTime<Utc>>,
}

/// Where planned children go
#[async_trait]
pub trait ChildDispatcher: Send + Sync {
    async fn dispatch_child(
        &self,
        ctx: &JobContext,
        backfill_id: BackfillId,
        child: ChildBatch,
    ) -> Result<()>;
}

pub struct RootExtractor {
    tracker: Arc<BackfillTracker>,
    cursors: Arc<dyn SyncCursorStore>,
    children: Arc<dyn ChildDispatcher>,
}

impl RootExtractor {
    pub fn new(
        tracker: Arc<BackfillTracker>,
        cursors: Arc<dyn SyncCursorStore>,
        children: Arc<dyn ChildDispatcher>,
    ) -> Self {
        Self {
            tracker,
            cursors,
            children,
        }
    }

    /// Run one root backfill
    ///
    /// Every run gets a fresh backfill id. A redelivered root therefore starts
    /// a new backfill; children of the abandoned one still upsert idempotently
    /// but their counters never feed the new id.
    #[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, source = %ctx.source))]
    pub async fn run(
        &self,
        connector: &dyn Connector,
        ctx: &JobContext,
        filter: Option<&DiscoveryFilter>,
        now: DateTime<Utc>,
    ) -> Result<RootReport> {
        let backfill_id = BackfillId::new();
        let ctx = ctx.clone().with_backfill(backfill_id);

        self.cursors
            .set(
                &ctx.tenant_id,
                ctx.source,
                CursorKey::FullBackfillComplete,
                CursorValue::Flag(false),
            )
            .await
            .context("Failed to reset full backfill flag")?;
        self.cursors
            .advance_timestamp(&ctx.tenant_id, ctx.source, CursorKey::SyncedUntil, now)
            .await
            .context("Failed to advance incremental cursor")?;

        let items = connector
            .discover(&ctx, filter)
            .await
            .context("Discovery failed")?;

        if items.is_empty() {
            info!(backfill_id = %backfill_id, "Discovery found nothing, completing backfill");
            self.tracker.complete_empty(&ctx, backfill_id).await?;
            return Ok(RootReport {
                backfill_id,
                discovered: 0,
                child_jobs: 0,
            });
        }

        let batches = partition(&items, connector.batch_size());
        let child_jobs = batches.len();
        let starts = child_start_times(now, child_jobs, connector.per_batch_delay());

        self.tracker
            .plan_ingest(&ctx, backfill_id, child_jobs)
            .await
            .context("Failed to record planned child jobs")?;

        for (index, (items, start_timestamp)) in batches.into_iter().zip(starts).enumerate() {
            self.children
                .dispatch_child(
                    &ctx,
                    backfill_id,
                    ChildBatch {
                        index,
                        items,
                        start_timestamp,
                    },
                )
                .await
                .with_context(|| format!("Failed to send child job {}", index))?;
        }

        let report = RootReport {
            backfill_id,
            discovered: items.len(),
            child_jobs,
        };
        info!(
            backfill_id = %backfill_id,
            discovered = report.discovered,
            child_jobs = report.child_jobs,
            "Backfill fanned out"
        );
        Ok(report)
    }
}

/// Split items into consecutive batches of at most `batch_size`
pub fn partition(items: &[ItemRef], batch_size: usize) -> Vec<Vec<ItemRef>> {
    items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::types::EntityType;

    fn items(n: usize) -> Vec<ItemRef> {
        (0..n)
            .map(|i| ItemRef::new(i.to_string(), EntityType::parse("doc").unwrap()))
            .collect()
    }

    #[test]
    fn test_partition_sizes() {
        let batches = partition(&items(125), 50);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 25]);
    }

    #[test]
    fn test_partition_exact_multiple() {
        assert_eq!(partition(&items(100), 50).len(), 2);
        assert!(partition(&items(0), 50).is_empty());
    }

    #[test]
    fn test_partition_zero_batch_size_is_one_per_batch() {
        assert_eq!(partition(&items(3), 0).len(), 3);
    }
}

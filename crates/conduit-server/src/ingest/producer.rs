//! Job producer
//!
//! Builds lane-routed messages for every job the system sends.
//!
//! Deduplication ids follow message content, which absorbs a retried send of
//! the same child or webhook job. Roots, tenant deletions and index progress
//! reports are explicit one-off requests and get unique ids instead: two
//! identical progress reports must both count.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_common::types::{BackfillId, Source, TenantId};
use std::sync::Arc;
use tracing::debug;

use super::framework::coordinator::{ChildBatch, ChildDispatcher};
use super::framework::types::{DiscoveryFilter, ItemRef, JobContext};
use super::jobs::{BackfillJob, JobTask};
use super::lanes::LaneRouter;
use super::queue::{JobQueue, OutgoingMessage};

#[derive(Clone)]
pub struct JobProducer {
    queue: Arc<dyn JobQueue>,
    lanes: LaneRouter,
}

impl JobProducer {
    pub fn new(queue: Arc<dyn JobQueue>, lanes: LaneRouter) -> Self {
        Self { queue, lanes }
    }

    pub fn lanes(&self) -> &LaneRouter {
        &self.lanes
    }

    async fn send(&self, lane: String, job: &BackfillJob) -> Result<String> {
        let message = OutgoingMessage::json(lane, job).context("Failed to encode job")?;
        self.dispatch(message, job).await
    }

    async fn send_unique(&self, lane: String, job: &BackfillJob) -> Result<String> {
        let message = OutgoingMessage::json(lane, job)
            .context("Failed to encode job")?
            .unique();
        self.dispatch(message, job).await
    }

    async fn dispatch(&self, message: OutgoingMessage, job: &BackfillJob) -> Result<String> {
        let lane = message.lane.clone();
        let message_id = self
            .queue
            .send(message)
            .await
            .with_context(|| format!("Failed to send {} job", job.task.name()))?;

        debug!(
            tenant_id = %job.tenant_id,
            source = %job.source,
            task = job.task.name(),
            kind = ?job.kind(),
            %lane,
            %message_id,
            "Job enqueued"
        );
        Ok(message_id)
    }

    /// Start a full backfill
    pub async fn enqueue_root(
        &self,
        tenant_id: &TenantId,
        source: Source,
        filter: Option<DiscoveryFilter>,
        suppress_notification: bool,
    ) -> Result<String> {
        let mut job = BackfillJob::new(tenant_id.clone(), source, JobTask::Root { filter });
        job.suppress_notification = suppress_notification;
        self.send_unique(self.lanes.backfill(tenant_id, source, 0), &job)
            .await
    }

    pub async fn enqueue_incremental(
        &self,
        tenant_id: &TenantId,
        source: Source,
        check_count: usize,
    ) -> Result<String> {
        let job = BackfillJob::new(tenant_id.clone(), source, JobTask::Incremental { check_count });
        self.send(self.lanes.incremental(tenant_id, source), &job).await
    }

    pub async fn enqueue_prune(&self, tenant_id: &TenantId, source: Source) -> Result<String> {
        let job = BackfillJob::new(tenant_id.clone(), source, JobTask::Prune);
        self.send(self.lanes.administrative(tenant_id), &job).await
    }

    pub async fn enqueue_tenant_deletion(&self, tenant_id: &TenantId, source: Source) -> Result<String> {
        let job = BackfillJob::new(tenant_id.clone(), source, JobTask::DeleteTenantData);
        self.send_unique(self.lanes.administrative(tenant_id), &job)
            .await
    }

    /// One job per changed entity, each on the entity's webhook lane
    pub async fn enqueue_webhook(
        &self,
        tenant_id: &TenantId,
        source: Source,
        items: Vec<ItemRef>,
    ) -> Result<usize> {
        let mut sent = 0;
        for item in items {
            let lane = self.lanes.webhook(tenant_id, &item.id);
            let job = BackfillJob::new(
                tenant_id.clone(),
                source,
                JobTask::Batch {
                    items: vec![item],
                    container: None,
                },
            );
            self.send(lane, &job).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Report finished index jobs for a backfill
    pub async fn enqueue_index_progress(
        &self,
        tenant_id: &TenantId,
        source: Source,
        backfill_id: BackfillId,
        index_jobs: u32,
    ) -> Result<String> {
        let mut job = BackfillJob::new(tenant_id.clone(), source, JobTask::IndexProgress { index_jobs });
        job.backfill_id = Some(backfill_id);
        self.send_unique(self.lanes.reindex(), &job).await
    }
}

#[async_trait]
impl ChildDispatcher for JobProducer {
    async fn dispatch_child(
        &self,
        ctx: &JobContext,
        backfill_id: BackfillId,
        child: ChildBatch,
    ) -> Result<()> {
        let job = BackfillJob {
            tenant_id: ctx.tenant_id.clone(),
            source: ctx.source,
            backfill_id: Some(backfill_id),
            start_timestamp: child.start_timestamp,
            suppress_notification: ctx.suppress_notification,
            task: JobTask::Batch {
                items: child.items,
                container: ctx.container.clone(),
            },
        };
        self.send(self.lanes.backfill(&ctx.tenant_id, ctx.source, child.index), &job)
            .await?;
        Ok(())
    }
}

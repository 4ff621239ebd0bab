//! Indexing trigger
//!
//! Called with entity ids once their artifacts are durable. Implementations
//! must tolerate being called more than once for the same ids.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_common::types::{BackfillId, EntityType, Source, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::{Artifact, JobContext};
use crate::ingest::lanes::LaneRouter;
use crate::ingest::queue::{JobQueue, OutgoingMessage};

/// Request to (re)index a set of entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub tenant_id: TenantId,
    pub source: Source,
    pub entities: Vec<IndexedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill_id: Option<BackfillId>,
    #[serde(default)]
    pub suppress_notification: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexedEntity {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl IndexRequest {
    pub fn entity_ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.entity_id.as_str()).collect()
    }
}

/// Split stored artifacts into index requests of at most `batch_size` entities
pub fn index_requests(ctx: &JobContext, artifacts: &[Artifact], batch_size: usize) -> Vec<IndexRequest> {
    artifacts
        .chunks(batch_size.max(1))
        .map(|chunk| IndexRequest {
            tenant_id: ctx.tenant_id.clone(),
            source: ctx.source,
            entities: chunk
                .iter()
                .map(|artifact| IndexedEntity {
                    entity_type: artifact.entity_type.clone(),
                    entity_id: artifact.entity_id.clone(),
                })
                .collect(),
            backfill_id: ctx.backfill_id,
            suppress_notification: ctx.suppress_notification,
        })
        .collect()
}

#[async_trait]
pub trait IndexingTrigger: Send + Sync {
    async fn trigger(&self, request: IndexRequest) -> Result<()>;
}

/// Sends index requests to the indexing queue
///
/// Requests carry no ordering requirement, so each goes out on its own
/// reindex lane.
pub struct QueueIndexingTrigger {
    queue: Arc<dyn JobQueue>,
    lanes: LaneRouter,
}

impl QueueIndexingTrigger {
    pub fn new(queue: Arc<dyn JobQueue>, lanes: LaneRouter) -> Self {
        Self { queue, lanes }
    }
}

#[async_trait]
impl IndexingTrigger for QueueIndexingTrigger {
    async fn trigger(&self, request: IndexRequest) -> Result<()> {
        let message = OutgoingMessage::json(self.lanes.reindex(), &request)
            .context("Failed to encode index request")?;
        let message_id = self
            .queue
            .send(message)
            .await
            .context("Failed to send index request")?;

        tracing::debug!(
            tenant_id = %request.tenant_id,
            source = %request.source,
            entities = request.entities.len(),
            message_id = %message_id,
            "Index request sent"
        );
        Ok(())
    }
}

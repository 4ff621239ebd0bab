//! Lane routing
//!
//! The job queue is FIFO per lane (message group). Lanes are chosen so that
//! ordering is enforced only where it matters and everything else runs in
//! parallel.

use conduit_common::digest::stable_shard;
use conduit_common::types::{Source, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::{DEFAULT_BACKFILL_LANES, DEFAULT_WEBHOOK_LANES};

/// Job families with distinct ordering needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Many lanes per tenant, keyed by entity
    Webhook,
    /// Bounded lanes per `(tenant, source)`
    Backfill,
    /// One lane per `(tenant, source)`
    Incremental,
    /// Fresh lane per message
    Reindex,
    /// One lane per tenant, serialized against other admin work
    Administrative,
}

/// Deterministic lane assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneRouter {
    webhook_lanes: u32,
    backfill_lanes: u32,
}

impl Default for LaneRouter {
    fn default() -> Self {
        Self::new(DEFAULT_WEBHOOK_LANES, DEFAULT_BACKFILL_LANES)
    }
}

impl LaneRouter {
    /// Lane counts of zero are treated as one
    pub fn new(webhook_lanes: u32, backfill_lanes: u32) -> Self {
        Self {
            webhook_lanes: webhook_lanes.max(1),
            backfill_lanes: backfill_lanes.max(1),
        }
    }

    pub fn webhook(&self, tenant_id: &TenantId, shard_key: &str) -> String {
        format!(
            "webhook:{}:{}",
            tenant_id,
            stable_shard(shard_key, self.webhook_lanes)
        )
    }

    /// Lane for the `index`-th job of a backfill fan-out
    pub fn backfill(&self, tenant_id: &TenantId, source: Source, index: usize) -> String {
        let lane = (index as u64 % u64::from(self.backfill_lanes)) as u32;
        format!("backfill:{}:{}:{}", tenant_id, source, lane)
    }

    pub fn incremental(&self, tenant_id: &TenantId, source: Source) -> String {
        format!("incremental:{}:{}", tenant_id, source)
    }

    pub fn reindex(&self) -> String {
        format!("reindex:{}", Uuid::new_v4().simple())
    }

    pub fn administrative(&self, tenant_id: &TenantId) -> String {
        format!("admin:{}", tenant_id)
    }
}

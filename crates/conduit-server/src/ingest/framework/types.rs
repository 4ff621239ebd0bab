//! Core types for the sync framework

use chrono::{DateTime, Utc};
use conduit_common::types::{BackfillId, EntityType, Source, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Per-job context threaded through every connector and store call
///
/// Anything a handler needs to remember between calls for the same job lives
/// here, never on the connector instance, since one connector serves many
/// concurrent jobs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub tenant_id: TenantId,
    pub source: Source,
    pub backfill_id: Option<BackfillId>,
    /// Provenance recorded on every artifact written by this job
    pub job_id: Uuid,
    /// Container the batch belongs to (project, space, folder), if any
    pub container: Option<String>,
    pub suppress_notification: bool,
}

impl JobContext {
    pub fn new(tenant_id: TenantId, source: Source) -> Self {
        Self {
            tenant_id,
            source,
            backfill_id: None,
            job_id: Uuid::new_v4(),
            container: None,
            suppress_notification: false,
        }
    }

    pub fn with_backfill(mut self, backfill_id: BackfillId) -> Self {
        self.backfill_id = Some(backfill_id);
        self
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn suppressed(mut self, suppress: bool) -> Self {
        self.suppress_notification = suppress;
        self
    }
}

/// Reference to one provider item as returned by a listing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Provider-specific data needed to fetch the item again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<Value>,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            modified_at: None,
            hint: None,
        }
    }

    pub fn modified(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }
}

/// One page of a provider listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<ItemRef>,
    pub next_page_token: Option<String>,
}

/// Listing order requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Whatever order the provider paginates in
    #[default]
    Natural,
    /// Most recently modified first
    RecentlyModified,
}

impl ListOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListOrder::Natural => "natural",
            ListOrder::RecentlyModified => "recently_modified",
        }
    }
}

/// Narrowing applied to root discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<Vec<EntityType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<DateTime<Utc>>,
}

impl DiscoveryFilter {
    pub fn matches(&self, item: &ItemRef) -> bool {
        if let Some(types) = &self.entity_types {
            if !types.contains(&item.entity_type) {
                return false;
            }
        }
        match (self.modified_since, item.modified_at) {
            (Some(since), Some(modified)) => modified >= since,
            // unknown modification times are kept
            _ => true,
        }
    }
}

/// Typed summary of an artifact used for filtering and pruning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Normalized snapshot of one source item
///
/// `(tenant_id, source, entity_type, entity_id)` identifies the latest known
/// state; writing the same key again overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub tenant_id: TenantId,
    pub source: Source,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub content: Value,
    pub metadata: ArtifactMetadata,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub ingest_job_id: Uuid,
}

/// One item that could not be turned into an artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub error: String,
}

/// Result of a root extractor run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootReport {
    pub backfill_id: BackfillId,
    pub discovered: usize,
    pub child_jobs: usize,
}

/// Result of a batch extractor run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub stored: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub index_requests: usize,
}

impl BatchReport {
    pub fn fully_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of an incremental poll
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncrementalReport {
    pub scanned: usize,
    pub stored: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub cursor_before: Option<DateTime<Utc>>,
    pub cursor_after: Option<DateTime<Utc>>,
    /// Whether the scan stopped at an item no newer than the cursor
    pub reached_cursor: bool,
}

/// Result of deleting a set of documents
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl DeletionReport {
    pub fn fully_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a prune pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PruneReport {
    /// Provider reported no live entities while documents are indexed
    SkippedEmptyProvider { indexed: usize },
    /// Too large a share of the index would have been removed
    SkippedRatio { stale: usize, indexed: usize },
    NothingStale { indexed: usize },
    Pruned { indexed: usize, report: DeletionReport },
}

/// Per-job summary reported back to the consumer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum JobSummary {
    Root(RootReport),
    Batch(BatchReport),
    Incremental(IncrementalReport),
    Prune(PruneReport),
    TenantDeleted(DeletionReport),
    IndexProgress { index_jobs: u32 },
}

/// What a handler asks the consumer to do with the message
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Work finished; acknowledge the message
    Completed(JobSummary),
    /// Not yet due; hide the message for this long and leave it queued
    RescheduleAfter(Duration),
}

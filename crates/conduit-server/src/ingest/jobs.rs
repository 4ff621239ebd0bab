//! Job message schema
//!
//! One envelope for every job: the common fields plus a tagged [`JobTask`].
//! The `source` field picks the connector before the task is dispatched.

use chrono::{DateTime, Utc};
use conduit_common::types::{BackfillId, Source, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::framework::types::{DiscoveryFilter, ItemRef, JobContext};
use super::lanes::JobKind;

/// A unit of work sent through the job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillJob {
    pub tenant_id: TenantId,
    pub source: Source,
    /// Shared by a root run and all of its children; absent outside backfills
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill_id: Option<BackfillId>,
    /// Earliest time the job may start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suppress_notification: bool,
    pub task: JobTask,
}

/// What the job does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTask {
    /// Discover everything and fan out child batches
    Root {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<DiscoveryFilter>,
    },
    /// Fetch, transform and store one batch of items
    Batch {
        items: Vec<ItemRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container: Option<String>,
    },
    /// Poll recently modified items since the sync cursor
    Incremental { check_count: usize },
    /// Remove documents the provider no longer reports
    Prune,
    /// Remove every document of the tenant for this source
    DeleteTenantData,
    /// Index jobs finished, reported by the indexing side
    IndexProgress { index_jobs: u32 },
}

impl JobTask {
    pub fn name(&self) -> &'static str {
        match self {
            JobTask::Root { .. } => "root",
            JobTask::Batch { .. } => "batch",
            JobTask::Incremental { .. } => "incremental",
            JobTask::Prune => "prune",
            JobTask::DeleteTenantData => "delete_tenant_data",
            JobTask::IndexProgress { .. } => "index_progress",
        }
    }
}

impl BackfillJob {
    pub fn new(tenant_id: TenantId, source: Source, task: JobTask) -> Self {
        Self {
            tenant_id,
            source,
            backfill_id: None,
            start_timestamp: None,
            suppress_notification: false,
            task,
        }
    }

    /// Ordering family the job is routed by
    pub fn kind(&self) -> JobKind {
        match &self.task {
            JobTask::Root { .. } => JobKind::Backfill,
            JobTask::Batch { .. } if self.backfill_id.is_some() => JobKind::Backfill,
            JobTask::Batch { .. } => JobKind::Webhook,
            JobTask::Incremental { .. } => JobKind::Incremental,
            JobTask::Prune | JobTask::DeleteTenantData => JobKind::Administrative,
            JobTask::IndexProgress { .. } => JobKind::Reindex,
        }
    }

    /// Context for one handler run of this job
    pub fn context(&self, job_id: Uuid) -> JobContext {
        let container = match &self.task {
            JobTask::Batch { container, .. } => container.clone(),
            _ => None,
        };
        let mut ctx = JobContext::new(self.tenant_id.clone(), self.source)
            .with_job_id(job_id)
            .with_container(container)
            .suppressed(self.suppress_notification);
        ctx.backfill_id = self.backfill_id;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::types::EntityType;
    use serde_json::json;

    #[test]
    fn test_batch_job_wire_format() {
        let mut job = BackfillJob::new(
            TenantId::parse("t1").unwrap(),
            Source::HttpFeed,
            JobTask::Batch {
                items: vec![ItemRef::new("42", EntityType::parse("issue").unwrap())],
                container: None,
            },
        );
        job.suppress_notification = true;

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({
                "tenant_id": "t1",
                "source": "http_feed",
                "suppress_notification": true,
                "task": {
                    "kind": "batch",
                    "items": [{ "id": "42", "entity_type": "issue" }]
                }
            })
        );
    }

    #[test]
    fn test_unit_tasks_decode() {
        let job: BackfillJob = serde_json::from_value(json!({
            "tenant_id": "t1",
            "source": "local_dir",
            "task": { "kind": "prune" }
        }))
        .unwrap();
        assert_eq!(job.task, JobTask::Prune);
        assert!(!job.suppress_notification);
        assert!(job.backfill_id.is_none());
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let result = serde_json::from_value::<BackfillJob>(json!({
            "tenant_id": "t1",
            "source": "carrier_pigeon",
            "task": { "kind": "prune" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_follows_task_and_backfill() {
        let t1 = TenantId::parse("t1").unwrap();
        let mut batch = BackfillJob::new(
            t1.clone(),
            Source::HttpFeed,
            JobTask::Batch {
                items: vec![],
                container: None,
            },
        );
        assert_eq!(batch.kind(), JobKind::Webhook);
        batch.backfill_id = Some(BackfillId::new());
        assert_eq!(batch.kind(), JobKind::Backfill);

        let prune = BackfillJob::new(t1, Source::HttpFeed, JobTask::DeleteTenantData);
        assert_eq!(prune.kind(), JobKind::Administrative);
    }

    #[test]
    fn test_context_carries_container_and_backfill() {
        let backfill = BackfillId::new();
        let mut job = BackfillJob::new(
            TenantId::parse("t1").unwrap(),
            Source::HttpFeed,
            JobTask::Batch {
                items: vec![],
                container: Some("space-1".to_string()),
            },
        );
        job.backfill_id = Some(backfill);

        let job_id = Uuid::new_v4();
        let ctx = job.context(job_id);
        assert_eq!(ctx.job_id, job_id);
        assert_eq!(ctx.backfill_id, Some(backfill));
        assert_eq!(ctx.container.as_deref(), Some("space-1"));
    }
}

//! Backfill progress counters and completion tracking
//!
//! Counters are only ever changed by adding a delta in one statement, so any
//! number of child jobs can report concurrently and in any order. Completion
//! is derived from the counters alone; there is no coordinator process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{BackfillId, Source, TenantId};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::cursor::{CursorKey, CursorValue, SyncCursorStore};
use super::types::JobContext;

/// Counters for one backfill
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillProgress {
    pub backfill_id: Uuid,
    pub tenant_id: String,
    pub total_ingest_jobs: i64,
    pub attempted_ingest_jobs: i64,
    pub done_ingest_jobs: i64,
    pub total_index_jobs: i64,
    pub done_index_jobs: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackfillProgress {
    /// Every planned child job was attempted and every planned index job
    /// reported back
    pub fn is_complete(&self) -> bool {
        self.attempted_ingest_jobs >= self.total_ingest_jobs
            && self.done_index_jobs >= self.total_index_jobs
    }

    fn from_row(row: &PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            backfill_id: row.try_get("backfill_id")?,
            tenant_id: row.try_get("tenant_id")?,
            total_ingest_jobs: row.try_get("total_ingest_jobs")?,
            attempted_ingest_jobs: row.try_get("attempted_ingest_jobs")?,
            done_ingest_jobs: row.try_get("done_ingest_jobs")?,
            total_index_jobs: row.try_get("total_index_jobs")?,
            done_index_jobs: row.try_get("done_index_jobs")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Counter columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressField {
    TotalIngestJobs,
    AttemptedIngestJobs,
    DoneIngestJobs,
    TotalIndexJobs,
    DoneIndexJobs,
}

impl ProgressField {
    pub fn column(&self) -> &'static str {
        match self {
            ProgressField::TotalIngestJobs => "total_ingest_jobs",
            ProgressField::AttemptedIngestJobs => "attempted_ingest_jobs",
            ProgressField::DoneIngestJobs => "done_ingest_jobs",
            ProgressField::TotalIndexJobs => "total_index_jobs",
            ProgressField::DoneIndexJobs => "done_index_jobs",
        }
    }
}

/// Atomic per-backfill counters
#[async_trait]
pub trait ProgressCounters: Send + Sync {
    /// Add `delta` to one counter, creating the row if needed, and return
    /// the counters as of that write
    async fn increment(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        field: ProgressField,
        delta: i64,
    ) -> Result<BackfillProgress>;

    async fn get(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
    ) -> Result<Option<BackfillProgress>>;

    /// Most recently started backfills for a tenant, newest first
    async fn list_recent(&self, tenant_id: &TenantId, limit: i64) -> Result<Vec<BackfillProgress>>;

    /// Stamp `completed_at` if it is still empty
    ///
    /// Exactly one caller gets `true` per backfill.
    async fn claim_completion(&self, backfill_id: BackfillId, tenant_id: &TenantId) -> Result<bool>;

    async fn add_total_ingest_jobs(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        n: i64,
    ) -> Result<BackfillProgress> {
        self.increment(backfill_id, tenant_id, ProgressField::TotalIngestJobs, n)
            .await
    }

    async fn add_attempted_ingest_jobs(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        n: i64,
    ) -> Result<BackfillProgress> {
        self.increment(backfill_id, tenant_id, ProgressField::AttemptedIngestJobs, n)
            .await
    }

    async fn add_done_ingest_jobs(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        n: i64,
    ) -> Result<BackfillProgress> {
        self.increment(backfill_id, tenant_id, ProgressField::DoneIngestJobs, n)
            .await
    }

    async fn add_total_index_jobs(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        n: i64,
    ) -> Result<BackfillProgress> {
        self.increment(backfill_id, tenant_id, ProgressField::TotalIndexJobs, n)
            .await
    }

    async fn add_done_index_jobs(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        n: i64,
    ) -> Result<BackfillProgress> {
        self.increment(backfill_id, tenant_id, ProgressField::DoneIndexJobs, n)
            .await
    }
}

/// PostgreSQL-backed counters
pub struct PgProgressCounters {
    pool: Arc<PgPool>,
}

impl PgProgressCounters {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressCounters for PgProgressCounters {
    async fn increment(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
        field: ProgressField,
        delta: i64,
    ) -> Result<BackfillProgress> {
        // column names come from a closed enum, never from input
        let column = field.column();
        let sql = format!(
            r#"
            INSERT INTO backfill_progress (backfill_id, tenant_id, {column})
            VALUES ($1, $2, $3)
            ON CONFLICT (backfill_id, tenant_id) DO UPDATE SET
                {column} = backfill_progress.{column} + EXCLUDED.{column},
                updated_at = NOW()
            RETURNING backfill_id, tenant_id, total_ingest_jobs, attempted_ingest_jobs,
                      done_ingest_jobs, total_index_jobs, done_index_jobs, completed_at
            "#
        );

        let row = sqlx::query(&sql)
            .bind(backfill_id.as_uuid())
            .bind(tenant_id.as_str())
            .bind(delta)
            .fetch_one(&*self.pool)
            .await
            .with_context(|| format!("Failed to increment {}", column))?;

        Ok(BackfillProgress::from_row(&row)?)
    }

    async fn get(
        &self,
        backfill_id: BackfillId,
        tenant_id: &TenantId,
    ) -> Result<Option<BackfillProgress>> {
        let row = sqlx::query(
            r#"
            SELECT backfill_id, tenant_id, total_ingest_jobs, attempted_ingest_jobs,
                   done_ingest_jobs, total_index_jobs, done_index_jobs, completed_at
            FROM backfill_progress
            WHERE backfill_id = $1 AND tenant_id = $2
            "#,
        )
        .bind(backfill_id.as_uuid())
        .bind(tenant_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .context("Failed to read backfill progress")?;

        Ok(row.as_ref().map(BackfillProgress::from_row).transpose()?)
    }

    async fn list_recent(&self, tenant_id: &TenantId, limit: i64) -> Result<Vec<BackfillProgress>> {
        let rows = sqlx::query(
            r#"
            SELECT backfill_id, tenant_id, total_ingest_jobs, attempted_ingest_jobs,
                   done_ingest_jobs, total_index_jobs, done_index_jobs, completed_at
            FROM backfill_progress
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .context("Failed to list backfills")?;

        Ok(rows
            .iter()
            .map(BackfillProgress::from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn claim_completion(&self, backfill_id: BackfillId, tenant_id: &TenantId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE backfill_progress
            SET completed_at = NOW(), updated_at = NOW()
            WHERE backfill_id = $1 AND tenant_id = $2 AND completed_at IS NULL
            "#,
        )
        .bind(backfill_id.as_uuid())
        .bind(tenant_id.as_str())
        .execute(&*self.pool)
        .await
        .context("Failed to mark backfill complete")?;

        Ok(result.rows_affected() == 1)
    }
}

/// Receives the one completion event per backfill
#[async_trait]
pub trait BackfillNotifier: Send + Sync {
    async fn backfill_completed(
        &self,
        tenant_id: &TenantId,
        source: Source,
        backfill_id: BackfillId,
        progress: &BackfillProgress,
    ) -> Result<()>;
}

/// Notifier that writes a structured log event
pub struct LogNotifier;

#[async_trait]
impl BackfillNotifier for LogNotifier {
    async fn backfill_completed(
        &self,
        tenant_id: &TenantId,
        source: Source,
        backfill_id: BackfillId,
        progress: &BackfillProgress,
    ) -> Result<()> {
        info!(
            tenant_id = %tenant_id,
            source = %source,
            backfill_id = %backfill_id,
            total_ingest_jobs = progress.total_ingest_jobs,
            done_ingest_jobs = progress.done_ingest_jobs,
            total_index_jobs = progress.total_index_jobs,
            "Backfill completed"
        );
        Ok(())
    }
}

/// Records job-level progress and fires completion exactly once
pub struct BackfillTracker {
    counters: Arc<dyn ProgressCounters>,
    cursors: Arc<dyn SyncCursorStore>,
    notifier: Arc<dyn BackfillNotifier>,
}

impl BackfillTracker {
    pub fn new(
        counters: Arc<dyn ProgressCounters>,
        cursors: Arc<dyn SyncCursorStore>,
        notifier: Arc<dyn BackfillNotifier>,
    ) -> Self {
        Self {
            counters,
            cursors,
            notifier,
        }
    }

    pub fn counters(&self) -> &Arc<dyn ProgressCounters> {
        &self.counters
    }

    /// Record planned child jobs; must happen before any child is sent
    pub async fn plan_ingest(&self, ctx: &JobContext, backfill_id: BackfillId, jobs: usize) -> Result<()> {
        self.counters
            .add_total_ingest_jobs(backfill_id, &ctx.tenant_id, jobs as i64)
            .await?;
        Ok(())
    }

    /// Record planned (positive) or withdrawn (negative) index jobs
    ///
    /// No-op for jobs outside a backfill.
    pub async fn plan_index(&self, ctx: &JobContext, delta: i64) -> Result<()> {
        if let Some(backfill_id) = ctx.backfill_id {
            if delta != 0 {
                self.counters
                    .add_total_index_jobs(backfill_id, &ctx.tenant_id, delta)
                    .await?;
            }
        }
        Ok(())
    }

    /// Record one child run: always attempted, done only on full success
    pub async fn record_attempt(&self, ctx: &JobContext, succeeded: bool) -> Result<()> {
        let Some(backfill_id) = ctx.backfill_id else {
            return Ok(());
        };

        let mut progress = self
            .counters
            .add_attempted_ingest_jobs(backfill_id, &ctx.tenant_id, 1)
            .await?;
        if succeeded {
            progress = self
                .counters
                .add_done_ingest_jobs(backfill_id, &ctx.tenant_id, 1)
                .await?;
        }

        self.finish_if_complete(ctx, backfill_id, &progress).await
    }

    /// Record index jobs reported finished by the indexing side
    pub async fn record_index_done(&self, ctx: &JobContext, index_jobs: u32) -> Result<()> {
        let Some(backfill_id) = ctx.backfill_id else {
            warn!(tenant_id = %ctx.tenant_id, "Index progress reported without a backfill id");
            return Ok(());
        };

        let progress = self
            .counters
            .add_done_index_jobs(backfill_id, &ctx.tenant_id, i64::from(index_jobs))
            .await?;

        self.finish_if_complete(ctx, backfill_id, &progress).await
    }

    /// Complete a backfill whose discovery found nothing
    pub async fn complete_empty(&self, ctx: &JobContext, backfill_id: BackfillId) -> Result<()> {
        let progress = self
            .counters
            .add_total_ingest_jobs(backfill_id, &ctx.tenant_id, 0)
            .await?;
        self.finish_if_complete(ctx, backfill_id, &progress).await
    }

    async fn finish_if_complete(
        &self,
        ctx: &JobContext,
        backfill_id: BackfillId,
        progress: &BackfillProgress,
    ) -> Result<()> {
        if !progress.is_complete() || progress.completed_at.is_some() {
            return Ok(());
        }

        // Flag first: a failed write leaves the backfill unclaimed for redelivery
        self.cursors
            .set(
                &ctx.tenant_id,
                ctx.source,
                CursorKey::FullBackfillComplete,
                CursorValue::Flag(true),
            )
            .await
            .context("Failed to flag full backfill complete")?;

        if !self
            .counters
            .claim_completion(backfill_id, &ctx.tenant_id)
            .await?
        {
            return Ok(());
        }

        if ctx.suppress_notification {
            info!(
                tenant_id = %ctx.tenant_id,
                backfill_id = %backfill_id,
                "Backfill completed, notification suppressed"
            );
            return Ok(());
        }

        self.notifier
            .backfill_completed(&ctx.tenant_id, ctx.source, backfill_id, progress)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(total: i64, attempted: i64, total_index: i64, done_index: i64) -> BackfillProgress {
        BackfillProgress {
            total_ingest_jobs: total,
            attempted_ingest_jobs: attempted,
            total_index_jobs: total_index,
            done_index_jobs: done_index,
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_requires_both_stages() {
        assert!(!progress(3, 2, 0, 0).is_complete());
        assert!(progress(3, 3, 0, 0).is_complete());
        assert!(!progress(3, 3, 2, 1).is_complete());
        assert!(progress(3, 3, 2, 2).is_complete());
    }

    #[test]
    fn test_redelivery_overcount_still_complete() {
        assert!(progress(3, 4, 1, 1).is_complete());
    }

    #[test]
    fn test_empty_backfill_is_complete() {
        assert!(progress(0, 0, 0, 0).is_complete());
    }

    #[tokio::test]
    async fn test_failed_flag_write_completes_on_redelivery() {
        use crate::ingest::framework::memory::{
            MemoryCursorStore, MemoryProgressCounters, RecordingNotifier,
        };

        let counters = Arc::new(MemoryProgressCounters::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = BackfillTracker::new(counters.clone(), cursors.clone(), notifier.clone());

        let backfill = BackfillId::new();
        let ctx = JobContext::new(TenantId::parse("t1").unwrap(), Source::HttpFeed)
            .with_backfill(backfill);
        tracker.plan_ingest(&ctx, backfill, 1).await.unwrap();

        cursors.fail_next_set();
        assert!(tracker.record_attempt(&ctx, true).await.is_err());
        assert!(notifier.completed().await.is_empty());

        // Redelivered child runs again
        tracker.record_attempt(&ctx, true).await.unwrap();

        let flag = cursors
            .get(&ctx.tenant_id, ctx.source, CursorKey::FullBackfillComplete)
            .await
            .unwrap();
        assert_eq!(flag, Some(CursorValue::Flag(true)));
        assert_eq!(notifier.completed().await.len(), 1);

        tracker.record_attempt(&ctx, true).await.unwrap();
        assert_eq!(notifier.completed().await.len(), 1);
    }

    #[test]
    fn test_field_columns_are_distinct() {
        let fields = [
            ProgressField::TotalIngestJobs,
            ProgressField::AttemptedIngestJobs,
            ProgressField::DoneIngestJobs,
            ProgressField::TotalIndexJobs,
            ProgressField::DoneIndexJobs,
        ];
        let columns: std::collections::HashSet<_> = fields.iter().map(|f| f.column()).collect();
        assert_eq!(columns.len(), fields.len());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_counters_accumulate_and_claim_once(pool: PgPool) {
        let counters = PgProgressCounters::new(Arc::new(pool));
        let tenant = TenantId::parse("t1").unwrap();
        let backfill = BackfillId::new();

        counters.add_total_ingest_jobs(backfill, &tenant, 3).await.unwrap();
        for _ in 0..3 {
            counters.add_attempted_ingest_jobs(backfill, &tenant, 1).await.unwrap();
        }
        let progress = counters.get(backfill, &tenant).await.unwrap().unwrap();
        assert_eq!(progress.attempted_ingest_jobs, 3);
        assert!(progress.is_complete());

        assert!(counters.claim_completion(backfill, &tenant).await.unwrap());
        assert!(!counters.claim_completion(backfill, &tenant).await.unwrap());
        assert_eq!(counters.list_recent(&tenant, 10).await.unwrap().len(), 1);
    }
}

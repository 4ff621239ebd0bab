//! Per-tenant, per-source sync cursors

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{Source, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;

/// Named cursor slots kept for every `(tenant, source)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKey {
    /// Newest `modified_at` the incremental poll has caught up to
    SyncedUntil,
    /// Whether the last root backfill ran to completion
    FullBackfillComplete,
}

impl CursorKey {
    pub const ALL: [CursorKey; 2] = [CursorKey::SyncedUntil, CursorKey::FullBackfillComplete];

    pub fn as_str(&self) -> &'static str {
        match self {
            CursorKey::SyncedUntil => "synced_until",
            CursorKey::FullBackfillComplete => "full_backfill_complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    Timestamp(DateTime<Utc>),
    Flag(bool),
}

impl CursorValue {
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            CursorValue::Timestamp(ts) => Some(*ts),
            CursorValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            CursorValue::Flag(flag) => Some(*flag),
            CursorValue::Timestamp(_) => None,
        }
    }
}

/// Durable cursor storage
#[async_trait]
pub trait SyncCursorStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
    ) -> Result<Option<CursorValue>>;

    async fn set(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        value: CursorValue,
    ) -> Result<()>;

    /// Move a timestamp cursor forward to `candidate` unless it is already
    /// newer; returns the stored value.
    async fn advance_timestamp(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        candidate: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    async fn clear(&self, tenant_id: &TenantId, source: Source, keys: &[CursorKey]) -> Result<()>;

    async fn synced_until(
        &self,
        tenant_id: &TenantId,
        source: Source,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get(tenant_id, source, CursorKey::SyncedUntil)
            .await?
            .and_then(|value| value.as_timestamp()))
    }

    async fn full_backfill_complete(&self, tenant_id: &TenantId, source: Source) -> Result<bool> {
        Ok(self
            .get(tenant_id, source, CursorKey::FullBackfillComplete)
            .await?
            .and_then(|value| value.as_flag())
            .unwrap_or(false))
    }
}

/// PostgreSQL-backed cursor store
///
/// Timestamps and flags live in separate nullable columns so the monotonic
/// advance can be a single `GREATEST` upsert.
pub struct PgCursorStore {
    pool: Arc<PgPool>,
}

impl PgCursorStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncCursorStore for PgCursorStore {
    async fn get(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
    ) -> Result<Option<CursorValue>> {
        let row = sqlx::query(
            r#"
            SELECT timestamp_value, flag_value
            FROM sync_cursors
            WHERE tenant_id = $1 AND source = $2 AND cursor_key = $3
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .context("Failed to read sync cursor")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let timestamp: Option<DateTime<Utc>> = row.try_get("timestamp_value")?;
        let flag: Option<bool> = row.try_get("flag_value")?;
        Ok(timestamp
            .map(CursorValue::Timestamp)
            .or(flag.map(CursorValue::Flag)))
    }

    async fn set(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        value: CursorValue,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (tenant_id, source, cursor_key, timestamp_value, flag_value)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, source, cursor_key) DO UPDATE SET
                timestamp_value = EXCLUDED.timestamp_value,
                flag_value = EXCLUDED.flag_value,
                updated_at = NOW()
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(key.as_str())
        .bind(value.as_timestamp())
        .bind(value.as_flag())
        .execute(&*self.pool)
        .await
        .context("Failed to write sync cursor")?;

        Ok(())
    }

    async fn advance_timestamp(
        &self,
        tenant_id: &TenantId,
        source: Source,
        key: CursorKey,
        candidate: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_cursors (tenant_id, source, cursor_key, timestamp_value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, source, cursor_key) DO UPDATE SET
                timestamp_value = GREATEST(sync_cursors.timestamp_value, EXCLUDED.timestamp_value),
                flag_value = NULL,
                updated_at = NOW()
            RETURNING timestamp_value
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(key.as_str())
        .bind(candidate)
        .fetch_one(&*self.pool)
        .await
        .context("Failed to advance sync cursor")?;

        Ok(row.try_get("timestamp_value")?)
    }

    async fn clear(&self, tenant_id: &TenantId, source: Source, keys: &[CursorKey]) -> Result<()> {
        let keys: Vec<&str> = keys.iter().map(CursorKey::as_str).collect();
        sqlx::query(
            r#"
            DELETE FROM sync_cursors
            WHERE tenant_id = $1 AND source = $2 AND cursor_key = ANY($3)
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(&keys)
        .execute(&*self.pool)
        .await
        .context("Failed to clear sync cursors")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_value_accessors() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(CursorValue::Timestamp(ts).as_timestamp(), Some(ts));
        assert_eq!(CursorValue::Timestamp(ts).as_flag(), None);
        assert_eq!(CursorValue::Flag(true).as_flag(), Some(true));
    }

    #[test]
    fn test_cursor_value_json_shape() {
        assert_eq!(serde_json::to_string(&CursorValue::Flag(false)).unwrap(), "false");
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_string(&CursorValue::Timestamp(ts)).unwrap();
        assert_eq!(json, "\"2026-01-02T03:04:05Z\"");
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_advance_is_monotonic(pool: PgPool) {
        let store = PgCursorStore::new(Arc::new(pool));
        let tenant = TenantId::parse("t1").unwrap();
        let later = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

        let stored = store
            .advance_timestamp(&tenant, Source::HttpFeed, CursorKey::SyncedUntil, later)
            .await
            .unwrap();
        assert_eq!(stored, later);

        let stored = store
            .advance_timestamp(&tenant, Source::HttpFeed, CursorKey::SyncedUntil, earlier)
            .await
            .unwrap();
        assert_eq!(stored, later);

        store
            .clear(&tenant, Source::HttpFeed, &CursorKey::ALL)
            .await
            .unwrap();
        assert_eq!(store.synced_until(&tenant, Source::HttpFeed).await.unwrap(), None);
    }
}

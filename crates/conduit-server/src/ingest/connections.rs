//! Source connections
//!
//! A tenant connects a source to start syncing it. Connecting clears the
//! source's cursors and starts a fresh backfill; disconnecting clears them
//! and stops the periodic jobs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{Source, TenantId};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::framework::cursor::{CursorKey, SyncCursorStore};
use super::producer::JobProducer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceConnection {
    pub tenant_id: TenantId,
    pub source: Source,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl SourceConnection {
    fn from_row(row: &PgRow) -> Result<Self> {
        let tenant_id: String = row.try_get("tenant_id")?;
        let source: String = row.try_get("source")?;
        Ok(Self {
            tenant_id: TenantId::parse(tenant_id)?,
            source: source.parse()?,
            enabled: row.try_get("enabled")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn set_enabled(&self, tenant_id: &TenantId, source: Source, enabled: bool) -> Result<()>;

    async fn get(&self, tenant_id: &TenantId, source: Source) -> Result<Option<SourceConnection>>;

    async fn list_enabled(&self) -> Result<Vec<SourceConnection>>;
}

pub struct PgConnectionStore {
    pool: Arc<PgPool>,
}

impl PgConnectionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn set_enabled(&self, tenant_id: &TenantId, source: Source, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_connections (tenant_id, source, enabled, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tenant_id, source)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(enabled)
        .execute(&*self.pool)
        .await
        .context("Failed to update source connection")?;
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, source: Source) -> Result<Option<SourceConnection>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, source, enabled, updated_at
            FROM source_connections
            WHERE tenant_id = $1 AND source = $2
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .fetch_optional(&*self.pool)
        .await
        .context("Failed to load source connection")?;

        row.as_ref().map(SourceConnection::from_row).transpose()
    }

    async fn list_enabled(&self) -> Result<Vec<SourceConnection>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, source, enabled, updated_at
            FROM source_connections
            WHERE enabled
            ORDER BY tenant_id, source
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .context("Failed to list source connections")?;

        rows.iter().map(SourceConnection::from_row).collect()
    }
}

#[derive(Default)]
pub struct MemoryConnectionStore {
    connections: Mutex<BTreeMap<(String, Source), SourceConnection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn set_enabled(&self, tenant_id: &TenantId, source: Source, enabled: bool) -> Result<()> {
        self.connections.lock().await.insert(
            (tenant_id.to_string(), source),
            SourceConnection {
                tenant_id: tenant_id.clone(),
                source,
                enabled,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, source: Source) -> Result<Option<SourceConnection>> {
        Ok(self
            .connections
            .lock()
            .await
            .get(&(tenant_id.to_string(), source))
            .cloned())
    }

    async fn list_enabled(&self) -> Result<Vec<SourceConnection>> {
        Ok(self
            .connections
            .lock()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }
}

pub struct ConnectionManager {
    connections: Arc<dyn ConnectionStore>,
    cursors: Arc<dyn SyncCursorStore>,
    producer: Arc<JobProducer>,
}

impl ConnectionManager {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        cursors: Arc<dyn SyncCursorStore>,
        producer: Arc<JobProducer>,
    ) -> Self {
        Self {
            connections,
            cursors,
            producer,
        }
    }

    /// Enable the source and start a fresh backfill; returns the root message id
    pub async fn connect(
        &self,
        tenant_id: &TenantId,
        source: Source,
        suppress_notification: bool,
    ) -> Result<String> {
        self.cursors
            .clear(tenant_id, source, &CursorKey::ALL)
            .await
            .context("Failed to clear sync cursors")?;
        self.connections.set_enabled(tenant_id, source, true).await?;
        let message_id = self
            .producer
            .enqueue_root(tenant_id, source, None, suppress_notification)
            .await?;

        info!(tenant_id = %tenant_id, source = %source, "Source connected");
        Ok(message_id)
    }

    pub async fn disconnect(&self, tenant_id: &TenantId, source: Source) -> Result<()> {
        self.cursors
            .clear(tenant_id, source, &CursorKey::ALL)
            .await
            .context("Failed to clear sync cursors")?;
        self.connections.set_enabled(tenant_id, source, false).await?;

        info!(tenant_id = %tenant_id, source = %source, "Source disconnected");
        Ok(())
    }
}

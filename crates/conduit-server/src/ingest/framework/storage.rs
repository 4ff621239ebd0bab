//! Artifact store
//!
//! Every write is an upsert keyed by `(tenant_id, source, entity_type,
//! entity_id)`, so redelivered jobs overwrite instead of appending.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_common::types::{EntityType, Source, TenantId};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{Artifact, ArtifactMetadata};

/// Rows per multi-row INSERT; keeps bind parameters well under the
/// PostgreSQL limit of 65535.
const UPSERT_CHUNK: usize = 500;

/// Keep only the last artifact per key
///
/// A single `INSERT .. ON CONFLICT DO UPDATE` cannot touch the same row twice.
fn latest_per_key(artifacts: &[Artifact]) -> Vec<&Artifact> {
    let mut positions = std::collections::HashMap::new();
    let mut latest: Vec<&Artifact> = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let key = (
            artifact.tenant_id.as_str(),
            artifact.source,
            artifact.entity_type.as_str(),
            artifact.entity_id.as_str(),
        );
        match positions.get(&key) {
            Some(&index) => latest[index] = artifact,
            None => {
                positions.insert(key, latest.len());
                latest.push(artifact);
            },
        }
    }
    latest
}

/// Persistence for normalized artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upsert_one(&self, artifact: &Artifact) -> Result<()> {
        self.upsert_many(std::slice::from_ref(artifact)).await
    }

    async fn upsert_many(&self, artifacts: &[Artifact]) -> Result<()>;

    async fn get_by_entity_ids(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_ids: &[String],
    ) -> Result<Vec<Artifact>>;

    /// Returns whether a row was removed; deleting a missing artifact is not
    /// an error.
    async fn delete_by_entity_id(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<bool>;
}

/// PostgreSQL-backed artifact store
pub struct PgArtifactStore {
    pool: Arc<PgPool>,
}

impl PgArtifactStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStore for PgArtifactStore {
    async fn upsert_many(&self, artifacts: &[Artifact]) -> Result<()> {
        let artifacts = latest_per_key(artifacts);
        for chunk in artifacts.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO artifacts (tenant_id, source, entity_type, entity_id, content, \
                 metadata, source_updated_at, ingest_job_id) ",
            );
            let mut encoded = Vec::with_capacity(chunk.len());
            for &artifact in chunk {
                let metadata = serde_json::to_value(&artifact.metadata)
                    .context("Failed to encode artifact metadata")?;
                encoded.push((artifact, metadata));
            }

            builder.push_values(encoded, |mut row, (artifact, metadata)| {
                row.push_bind(artifact.tenant_id.as_str())
                    .push_bind(artifact.source.as_str())
                    .push_bind(artifact.entity_type.as_str())
                    .push_bind(&artifact.entity_id)
                    .push_bind(&artifact.content)
                    .push_bind(metadata)
                    .push_bind(artifact.source_updated_at)
                    .push_bind(artifact.ingest_job_id);
            });
            builder.push(
                " ON CONFLICT (tenant_id, source, entity_type, entity_id) DO UPDATE SET \
                 content = EXCLUDED.content, \
                 metadata = EXCLUDED.metadata, \
                 source_updated_at = EXCLUDED.source_updated_at, \
                 ingest_job_id = EXCLUDED.ingest_job_id, \
                 updated_at = NOW()",
            );

            builder
                .build()
                .execute(&*self.pool)
                .await
                .context("Failed to upsert artifacts")?;
        }

        Ok(())
    }

    async fn get_by_entity_ids(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_ids: &[String],
    ) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, content, metadata, source_updated_at, ingest_job_id
            FROM artifacts
            WHERE tenant_id = $1 AND source = $2 AND entity_type = $3
              AND entity_id = ANY($4)
            ORDER BY entity_id
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(entity_type.as_str())
        .bind(entity_ids)
        .fetch_all(&*self.pool)
        .await
        .context("Failed to load artifacts")?;

        rows.into_iter()
            .map(|row| -> Result<Artifact> {
                let metadata: serde_json::Value = row.try_get("metadata")?;
                Ok(Artifact {
                    tenant_id: tenant_id.clone(),
                    source,
                    entity_type: entity_type.clone(),
                    entity_id: row.try_get("entity_id")?,
                    content: row.try_get("content")?,
                    metadata: serde_json::from_value::<ArtifactMetadata>(metadata)
                        .context("Stored artifact metadata is not valid")?,
                    source_updated_at: row.try_get::<Option<DateTime<Utc>>, _>("source_updated_at")?,
                    ingest_job_id: row.try_get::<Uuid, _>("ingest_job_id")?,
                })
            })
            .collect()
    }

    async fn delete_by_entity_id(
        &self,
        tenant_id: &TenantId,
        source: Source,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM artifacts
            WHERE tenant_id = $1 AND source = $2 AND entity_type = $3 AND entity_id = $4
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .bind(entity_type.as_str())
        .bind(entity_id)
        .execute(&*self.pool)
        .await
        .context("Failed to delete artifact")?;

        Ok(result.rows_affected() > 0)
    }
}

//! Indexed documents and the referrer graph in the primary store
//!
//! Documents are written by the indexing side; the core only lists them,
//! walks parent/child links, releases their outgoing citations and deletes
//! them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_common::types::{EntityType, Source, TenantId};
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;

/// One document as seen by the pruner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexedDocument {
    pub document_id: String,
    pub source: Source,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub parent_document_id: Option<String>,
}

impl IndexedDocument {
    fn from_row(row: &PgRow) -> Result<Self> {
        let source: String = row.try_get("source")?;
        let entity_type: String = row.try_get("entity_type")?;
        Ok(Self {
            document_id: row.try_get("document_id")?,
            source: source.parse()?,
            entity_type: EntityType::parse(entity_type)?,
            entity_id: row.try_get("entity_id")?,
            parent_document_id: row.try_get("parent_document_id")?,
        })
    }
}

/// Citations a deleted document had contributed to another document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceContribution {
    pub target_document_id: String,
    pub count: i64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_indexed(&self, tenant_id: &TenantId, source: Source) -> Result<Vec<IndexedDocument>>;

    async fn children_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<IndexedDocument>>;

    /// Outgoing citations of a document, left in place
    async fn references_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<ReferenceContribution>>;

    /// Drop one outgoing citation and take its count off the cited document.
    /// Atomic; releasing a citation that is already gone is a no-op.
    async fn release_reference(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
        target_document_id: &str,
    ) -> Result<()>;

    /// Remove the document row. Its citations must be released first.
    async fn delete_document(&self, tenant_id: &TenantId, document_id: &str) -> Result<()>;

    async fn referrer_count(&self, tenant_id: &TenantId, document_id: &str) -> Result<Option<i64>>;
}

pub struct PgDocumentStore {
    pool: Arc<PgPool>,
}

impl PgDocumentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn list_indexed(&self, tenant_id: &TenantId, source: Source) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, source, entity_type, entity_id, parent_document_id
            FROM documents
            WHERE tenant_id = $1 AND source = $2
            ORDER BY document_id
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(source.as_str())
        .fetch_all(&*self.pool)
        .await
        .context("Failed to list indexed documents")?;

        rows.iter().map(IndexedDocument::from_row).collect()
    }

    async fn children_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, source, entity_type, entity_id, parent_document_id
            FROM documents
            WHERE tenant_id = $1 AND parent_document_id = $2
            ORDER BY document_id
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(document_id)
        .fetch_all(&*self.pool)
        .await
        .context("Failed to list child documents")?;

        rows.iter().map(IndexedDocument::from_row).collect()
    }

    async fn references_of(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
    ) -> Result<Vec<ReferenceContribution>> {
        let rows = sqlx::query(
            r#"
            SELECT target_document_id, reference_count
            FROM document_references
            WHERE tenant_id = $1 AND source_document_id = $2
            ORDER BY target_document_id
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(document_id)
        .fetch_all(&*self.pool)
        .await
        .context("Failed to list outgoing references")?;

        rows.iter()
            .map(|row| -> Result<ReferenceContribution> {
                Ok(ReferenceContribution {
                    target_document_id: row.try_get("target_document_id")?,
                    count: row.try_get("reference_count")?,
                })
            })
            .collect()
    }

    async fn release_reference(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
        target_document_id: &str,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start reference release")?;

        let count: Option<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM document_references
            WHERE tenant_id = $1 AND source_document_id = $2 AND target_document_id = $3
            RETURNING reference_count
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(document_id)
        .bind(target_document_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to delete outgoing reference")?;

        if let Some(count) = count {
            sqlx::query(
                r#"
                UPDATE documents
                SET referrer_count = referrer_count - $3, updated_at = NOW()
                WHERE tenant_id = $1 AND document_id = $2
                "#,
            )
            .bind(tenant_id.as_str())
            .bind(target_document_id)
            .bind(count)
            .execute(&mut *tx)
            .await
            .context("Failed to decrement referrer count")?;
        }

        tx.commit().await.context("Failed to commit reference release")?;
        Ok(())
    }

    async fn delete_document(&self, tenant_id: &TenantId, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE tenant_id = $1 AND document_id = $2")
            .bind(tenant_id.as_str())
            .bind(document_id)
            .execute(&*self.pool)
            .await
            .context("Failed to delete document")?;
        Ok(())
    }

    async fn referrer_count(&self, tenant_id: &TenantId, document_id: &str) -> Result<Option<i64>> {
        let count = sqlx::query_scalar(
            "SELECT referrer_count FROM documents WHERE tenant_id = $1 AND document_id = $2",
        )
        .bind(tenant_id.as_str())
        .bind(document_id)
        .fetch_optional(&*self.pool)
        .await
        .context("Failed to read referrer count")?;

        Ok(count)
    }
}

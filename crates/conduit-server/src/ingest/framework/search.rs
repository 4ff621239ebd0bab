//! Search index operations issued by the deletion engine

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_common::types::TenantId;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Remove a document; removing a missing document succeeds
    async fn delete_document(&self, tenant_id: &TenantId, document_id: &str) -> Result<()>;

    /// Add `delta` (usually negative) to a document's stored referrer count
    async fn adjust_referrer_count(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
        delta: i64,
    ) -> Result<()>;
}

/// Search index reached over its HTTP API
pub struct HttpSearchIndex {
    client: Client,
    base_url: String,
}

impl HttpSearchIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build search index HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn document_url(&self, tenant_id: &TenantId, document_id: &str) -> String {
        format!(
            "{}/tenants/{}/documents/{}",
            self.base_url,
            tenant_id,
            urlencoding::encode(document_id)
        )
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn delete_document(&self, tenant_id: &TenantId, document_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.document_url(tenant_id, document_id))
            .send()
            .await
            .context("Search index delete request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .context("Search index rejected document deletion")?;
        Ok(())
    }

    async fn adjust_referrer_count(
        &self,
        tenant_id: &TenantId,
        document_id: &str,
        delta: i64,
    ) -> Result<()> {
        let url = format!("{}/referrers", self.document_url(tenant_id, document_id));
        self.client
            .post(url)
            .json(&json!({ "delta": delta }))
            .send()
            .await
            .context("Search index referrer request failed")?
            .error_for_status()
            .context("Search index rejected referrer adjustment")?;
        Ok(())
    }
}

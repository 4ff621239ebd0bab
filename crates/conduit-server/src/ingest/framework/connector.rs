//! Connector capability trait
//!
//! Implement this trait for any provider. The orchestration core only ever
//! lists pages, fetches one item's detail, and transforms it into an
//! [`Artifact`]; pagination, auth and field mapping stay inside the connector.

use async_trait::async_trait;
use conduit_common::types::Source;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use super::types::{Artifact, DiscoveryFilter, ItemPage, ItemRef, JobContext, ListOrder};
use crate::ingest::config::{DEFAULT_BATCH_SIZE, DEFAULT_PER_BATCH_DELAY_SECS};

/// Upper bound on pages walked by one full listing
pub const MAX_LISTING_PAGES: usize = 10_000;

/// Provider-side failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Network hiccup or rate limit on a single call
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("item not found: {0}")]
    NotFound(String),

    /// Provider cannot be reached at all
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// Missing or rejected credentials, bad base URL
    #[error("connector misconfigured: {0}")]
    Config(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ConnectorError {
    /// Whether the error should fail the whole job instead of one item
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::Unreachable(_) | ConnectorError::Config(_))
    }
}

pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Provider capability interface
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source this connector serves
    fn source(&self) -> Source;

    /// Items per child job, sized to the provider's rate limit
    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }

    /// Spacing between the start times of consecutive child jobs
    fn per_batch_delay(&self) -> Duration {
        Duration::from_secs(DEFAULT_PER_BATCH_DELAY_SECS)
    }

    /// Fetch one page of the provider listing
    async fn list_page(
        &self,
        ctx: &JobContext,
        page_token: Option<&str>,
        order: ListOrder,
    ) -> ConnectorResult<ItemPage>;

    /// Fetch the full representation of one item
    async fn fetch_detail(&self, ctx: &JobContext, item: &ItemRef) -> ConnectorResult<Value>;

    /// Turn a fetched item into an artifact
    fn transform(
        &self,
        ctx: &JobContext,
        item: &ItemRef,
        detail: Value,
    ) -> ConnectorResult<Artifact>;

    /// Discover everything a root backfill should sync
    async fn discover(
        &self,
        ctx: &JobContext,
        filter: Option<&DiscoveryFilter>,
    ) -> ConnectorResult<Vec<ItemRef>> {
        let mut items = list_all(self, ctx, ListOrder::Natural).await?;
        if let Some(filter) = filter {
            items.retain(|item| filter.matches(item));
        }
        Ok(items)
    }

    /// Every entity the provider currently reports as alive
    async fn list_live_entities(&self, ctx: &JobContext) -> ConnectorResult<Vec<ItemRef>> {
        list_all(self, ctx, ListOrder::Natural).await
    }
}

/// Walk every page of a listing
///
/// A provider that hands back a page token it already issued would loop
/// forever, so repeated tokens are reported as malformed.
pub async fn list_all<C>(
    connector: &C,
    ctx: &JobContext,
    order: ListOrder,
) -> ConnectorResult<Vec<ItemRef>>
where
    C: Connector + ?Sized,
{
    let mut items = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut token: Option<String> = None;

    for _ in 0..MAX_LISTING_PAGES {
        let page = connector.list_page(ctx, token.as_deref(), order).await?;
        items.extend(page.items);

        match page.next_page_token {
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(ConnectorError::Malformed(format!(
                        "page token '{}' was returned twice",
                        next
                    )));
                }
                token = Some(next);
            },
            None => return Ok(items),
        }
    }

    Err(ConnectorError::Malformed(format!(
        "listing exceeded {} pages",
        MAX_LISTING_PAGES
    )))
}

//! Incremental extractor
//!
//! Polls the provider newest-first and stops at the first item that is not
//! newer than the `synced_until` cursor. The cursor only moves forward.
//!
//! The cursor advances past every item the poll attempted, including items
//! whose fetch or transform failed with a non-fatal error. Such an item is
//! picked up again only once the provider modifies it again.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::connector::{Connector, MAX_LISTING_PAGES};
use super::cursor::{CursorKey, SyncCursorStore};
use super::indexing::{index_requests, IndexingTrigger};
use super::storage::ArtifactStore;
use super::types::{Artifact, FailedItem, IncrementalReport, JobContext, ListOrder};

/// Cursor used when none has been stored yet
pub fn default_lookback(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

pub struct IncrementalExtractor {
    artifacts: Arc<dyn ArtifactStore>,
    cursors: Arc<dyn SyncCursorStore>,
    indexing: Arc<dyn IndexingTrigger>,
    index_batch_size: usize,
}

impl IncrementalExtractor {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        cursors: Arc<dyn SyncCursorStore>,
        indexing: Arc<dyn IndexingTrigger>,
        index_batch_size: usize,
    ) -> Self {
        Self {
            artifacts,
            cursors,
            indexing,
            index_batch_size: index_batch_size.max(1),
        }
    }

    #[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, source = %ctx.source, check_count = check_count))]
    pub async fn run(
        &self,
        connector: &dyn Connector,
        ctx: &JobContext,
        check_count: usize,
        now: DateTime<Utc>,
    ) -> Result<IncrementalReport> {
        let cursor_before = self
            .cursors
            .synced_until(&ctx.tenant_id, ctx.source)
            .await
            .context("Failed to read sync cursor")?;
        let since = cursor_before.unwrap_or_else(|| default_lookback(now));

        let mut report = IncrementalReport {
            cursor_before,
            ..Default::default()
        };
        let mut built: Vec<Artifact> = Vec::new();
        let mut newest: Option<DateTime<Utc>> = None;
        let mut token: Option<String> = None;

        'pages: for _ in 0..MAX_LISTING_PAGES {
            let page = connector
                .list_page(ctx, token.as_deref(), ListOrder::RecentlyModified)
                .await
                .context("Failed to list recently modified items")?;

            for item in page.items {
                if report.scanned >= check_count {
                    debug!("Scan limit reached");
                    break 'pages;
                }
                report.scanned += 1;

                let Some(modified_at) = item.modified_at else {
                    debug!(item_id = %item.id, "Item has no modification time, skipping");
                    continue;
                };
                if modified_at <= since {
                    report.reached_cursor = true;
                    break 'pages;
                }

                newest = Some(newest.map_or(modified_at, |n| n.max(modified_at)));

                let result = match connector.fetch_detail(ctx, &item).await {
                    Ok(detail) => connector.transform(ctx, &item, detail),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(artifact) => built.push(artifact),
                    Err(e) if e.is_fatal() => {
                        return Err(anyhow!(e).context(format!("Item {} failed fatally", item.id)));
                    },
                    Err(e) => {
                        warn!(item_id = %item.id, error = %e, "Skipping item");
                        report.failed.push(FailedItem {
                            id: item.id.clone(),
                            error: e.to_string(),
                        });
                    },
                }
            }

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if !built.is_empty() {
            self.artifacts
                .upsert_many(&built)
                .await
                .context("Failed to store artifacts")?;
        }
        for request in index_requests(ctx, &built, self.index_batch_size) {
            self.indexing
                .trigger(request)
                .await
                .context("Failed to trigger indexing")?;
        }

        report.cursor_after = match newest {
            Some(newest) => Some(
                self.cursors
                    .advance_timestamp(&ctx.tenant_id, ctx.source, CursorKey::SyncedUntil, newest)
                    .await
                    .context("Failed to advance sync cursor")?,
            ),
            None => cursor_before,
        };
        report.stored = built.into_iter().map(|a| a.entity_id).collect();

        info!(
            scanned = report.scanned,
            stored = report.stored.len(),
            failed = report.failed.len(),
            "Incremental poll finished"
        );
        Ok(report)
    }
}

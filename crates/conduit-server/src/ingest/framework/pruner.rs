//! Pruner
//!
//! Removes indexed documents whose entity the provider no longer reports.
//! Two guards must pass first: the provider must report at least one live
//! entity, and the stale share of the index must stay below the threshold.
//! A tripped guard is a warning and a no-op, not an error.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::connector::Connector;
use super::cursor::{CursorKey, SyncCursorStore};
use super::deletion::DocumentDeleter;
use super::types::{DeletionReport, JobContext, PruneReport};

pub struct Pruner {
    deleter: Arc<DocumentDeleter>,
    cursors: Arc<dyn SyncCursorStore>,
    threshold: f64,
}

impl Pruner {
    /// `threshold` is the stale share at or above which nothing is deleted
    pub fn new(deleter: Arc<DocumentDeleter>, cursors: Arc<dyn SyncCursorStore>, threshold: f64) -> Self {
        Self {
            deleter,
            cursors,
            threshold,
        }
    }

    #[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, source = %ctx.source))]
    pub async fn prune(&self, connector: &dyn Connector, ctx: &JobContext) -> Result<PruneReport> {
        let live = connector
            .list_live_entities(ctx)
            .await
            .context("Failed to list live entities")?;
        let indexed = self
            .deleter
            .documents()
            .list_indexed(&ctx.tenant_id, ctx.source)
            .await
            .context("Failed to list indexed documents")?;

        if indexed.is_empty() {
            return Ok(PruneReport::NothingStale { indexed: 0 });
        }
        if live.is_empty() {
            warn!(
                indexed = indexed.len(),
                "Provider reported no live entities, refusing to prune"
            );
            return Ok(PruneReport::SkippedEmptyProvider {
                indexed: indexed.len(),
            });
        }

        let alive: HashSet<(&str, &str)> = live
            .iter()
            .map(|item| (item.entity_type.as_str(), item.id.as_str()))
            .collect();
        let stale: Vec<_> = indexed
            .iter()
            .filter(|doc| !alive.contains(&(doc.entity_type.as_str(), doc.entity_id.as_str())))
            .cloned()
            .collect();

        if stale.is_empty() {
            return Ok(PruneReport::NothingStale {
                indexed: indexed.len(),
            });
        }

        let ratio = stale.len() as f64 / indexed.len() as f64;
        if ratio >= self.threshold {
            warn!(
                stale = stale.len(),
                indexed = indexed.len(),
                threshold = self.threshold,
                "Stale share at or above threshold, refusing to prune"
            );
            return Ok(PruneReport::SkippedRatio {
                stale: stale.len(),
                indexed: indexed.len(),
            });
        }

        let report = self.deleter.delete_all(&ctx.tenant_id, &stale).await;
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Prune pass finished"
        );
        Ok(PruneReport::Pruned {
            indexed: indexed.len(),
            report,
        })
    }

    /// Delete everything indexed for the tenant and source, then clear cursors
    ///
    /// Explicit request, so no guards. Any failed document fails the job and
    /// the cursors are left alone until a redelivery finishes the job.
    #[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, source = %ctx.source))]
    pub async fn delete_tenant_data(&self, ctx: &JobContext) -> Result<DeletionReport> {
        let indexed = self
            .deleter
            .documents()
            .list_indexed(&ctx.tenant_id, ctx.source)
            .await
            .context("Failed to list indexed documents")?;

        let report = self.deleter.delete_all(&ctx.tenant_id, &indexed).await;
        if !report.fully_succeeded() {
            bail!(
                "{} of {} documents could not be deleted",
                report.failed.len(),
                indexed.len()
            );
        }

        self.cursors
            .clear(&ctx.tenant_id, ctx.source, &CursorKey::ALL)
            .await
            .context("Failed to clear sync cursors")?;

        info!(deleted = report.deleted.len(), "Tenant data deleted");
        Ok(report)
    }
}

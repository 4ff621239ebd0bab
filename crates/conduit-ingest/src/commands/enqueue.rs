//! Commands that put a single job on the queue

use anyhow::Result;
use chrono::{DateTime, Utc};
use conduit_common::types::{BackfillId, EntityType};
use conduit_server::ingest::framework::DiscoveryFilter;
use tracing::info;

use super::producer;
use crate::Target;

/// Start a full backfill, optionally narrowed by entity type or modification time
pub async fn backfill(
    target: &Target,
    entity_types: &[String],
    modified_since: Option<DateTime<Utc>>,
    suppress_notification: bool,
) -> Result<()> {
    let filter = discovery_filter(entity_types, modified_since)?;
    let producer = producer().await?;
    let message_id = producer
        .enqueue_root(&target.tenant, target.source, filter, suppress_notification)
        .await?;

    info!(tenant_id = %target.tenant, source = %target.source, message_id = %message_id, "Backfill enqueued");
    println!("Backfill enqueued for {} / {} ({})", target.tenant, target.source, message_id);
    Ok(())
}

pub async fn incremental(target: &Target, check_count: usize) -> Result<()> {
    let message_id = producer()
        .await?
        .enqueue_incremental(&target.tenant, target.source, check_count)
        .await?;
    println!("Incremental poll enqueued for {} / {} ({})", target.tenant, target.source, message_id);
    Ok(())
}

pub async fn prune(target: &Target) -> Result<()> {
    let message_id = producer()
        .await?
        .enqueue_prune(&target.tenant, target.source)
        .await?;
    println!("Prune enqueued for {} / {} ({})", target.tenant, target.source, message_id);
    Ok(())
}

pub async fn delete_tenant(target: &Target, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "Refusing to delete data for tenant '{}' without --yes",
            target.tenant
        );
    }
    let message_id = producer()
        .await?
        .enqueue_tenant_deletion(&target.tenant, target.source)
        .await?;
    println!("Tenant deletion enqueued for {} / {} ({})", target.tenant, target.source, message_id);
    Ok(())
}

pub async fn index_done(target: &Target, backfill_id: BackfillId, count: u32) -> Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    let message_id = producer()
        .await?
        .enqueue_index_progress(&target.tenant, target.source, backfill_id, count)
        .await?;
    println!("Reported {} finished index job(s) for {} ({})", count, backfill_id, message_id);
    Ok(())
}

fn discovery_filter(
    entity_types: &[String],
    modified_since: Option<DateTime<Utc>>,
) -> Result<Option<DiscoveryFilter>> {
    if entity_types.is_empty() && modified_since.is_none() {
        return Ok(None);
    }

    let entity_types = if entity_types.is_empty() {
        None
    } else {
        Some(
            entity_types
                .iter()
                .map(|raw| EntityType::parse(raw.as_str()))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        )
    };

    Ok(Some(DiscoveryFilter {
        entity_types,
        modified_since,
    }))
}

//! Source connection commands

use anyhow::Result;
use conduit_server::ingest::framework::PgCursorStore;
use conduit_server::ingest::{ConnectionManager, PgConnectionStore};
use std::sync::Arc;

use super::{database, producer};
use crate::Target;

async fn manager() -> Result<ConnectionManager> {
    let db = database().await?;
    Ok(ConnectionManager::new(
        Arc::new(PgConnectionStore::new(db.clone())),
        Arc::new(PgCursorStore::new(db)),
        producer().await?,
    ))
}

pub async fn connect(target: &Target, suppress_notification: bool) -> Result<()> {
    let message_id = manager()
        .await?
        .connect(&target.tenant, target.source, suppress_notification)
        .await?;
    println!(
        "Connected {} for {}; initial backfill enqueued ({})",
        target.source, target.tenant, message_id
    );
    Ok(())
}

pub async fn disconnect(target: &Target) -> Result<()> {
    manager().await?.disconnect(&target.tenant, target.source).await?;
    println!("Disconnected {} for {}", target.source, target.tenant);
    Ok(())
}

//! Backfill progress inspection

use anyhow::Result;
use conduit_common::types::{BackfillId, TenantId};
use conduit_server::ingest::framework::{BackfillProgress, PgProgressCounters, ProgressCounters};

use super::database;

pub async fn run(tenant: &TenantId, backfill_id: Option<BackfillId>, limit: i64) -> Result<()> {
    let counters = PgProgressCounters::new(database().await?);

    let rows = match backfill_id {
        Some(id) => match counters.get(id, tenant).await? {
            Some(progress) => vec![progress],
            None => anyhow::bail!("Backfill {} not found for tenant '{}'", id, tenant),
        },
        None => counters.list_recent(tenant, limit.clamp(1, 200)).await?,
    };

    if rows.is_empty() {
        println!("No backfills recorded for tenant '{}'", tenant);
        return Ok(());
    }

    println!(
        "{:<36}  {:>13}  {:>11}  {:>8}",
        "BACKFILL", "INGEST", "INDEX", "STATUS"
    );
    for progress in &rows {
        println!("{}", format_row(progress));
    }
    Ok(())
}

fn format_row(progress: &BackfillProgress) -> String {
    let ingest = format!(
        "{}/{}/{}",
        progress.done_ingest_jobs, progress.attempted_ingest_jobs, progress.total_ingest_jobs
    );
    let index = format!("{}/{}", progress.done_index_jobs, progress.total_index_jobs);
    let status = if progress.completed_at.is_some() {
        "complete"
    } else {
        "running"
    };
    format!("{:<36}  {:>13}  {:>11}  {:>8}", progress.backfill_id, ingest, index, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_format_row_shows_counters() {
        let progress = BackfillProgress {
            backfill_id: Uuid::nil(),
            tenant_id: "acme".to_string(),
            total_ingest_jobs: 3,
            attempted_ingest_jobs: 3,
            done_ingest_jobs: 2,
            total_index_jobs: 3,
            done_index_jobs: 1,
            completed_at: None,
        };
        let row = format_row(&progress);
        assert!(row.contains("2/3/3"));
        assert!(row.contains("1/3"));
        assert!(row.ends_with("running"));

        let done = BackfillProgress {
            completed_at: Some(Utc::now()),
            ..progress
        };
        assert!(format_row(&done).ends_with("complete"));
    }
}

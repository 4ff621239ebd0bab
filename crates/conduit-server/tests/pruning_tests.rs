//! Pruning and tenant deletion through the job runner

mod common;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use common::{doc_type, item, tenant, FixtureConnector, Harness};
use conduit_common::types::Source;
use conduit_server::ingest::framework::cursor::{CursorKey, SyncCursorStore};
use conduit_server::ingest::framework::documents::IndexedDocument;
use conduit_server::ingest::framework::types::{JobOutcome, JobSummary, PruneReport};
use conduit_server::ingest::{BackfillJob, JobTask};

fn document(id: &str, parent: Option<&str>) -> IndexedDocument {
    IndexedDocument {
        document_id: format!("doc-{}", id),
        source: Source::HttpFeed,
        entity_type: doc_type(),
        entity_id: id.to_string(),
        parent_document_id: parent.map(|p| format!("doc-{}", p)),
    }
}

/// Ten indexed documents `e0`..`e9`; the provider reports `live` of them
async fn harness(live: &[&str]) -> Harness {
    let h = Harness::new(FixtureConnector::new(live.iter().map(|id| item(*id)).collect()));
    for i in 0..10 {
        h.documents.insert(&tenant(), document(&format!("e{}", i), None)).await;
    }
    h
}

async fn prune(h: &Harness) -> Result<PruneReport> {
    let job = BackfillJob::new(tenant(), Source::HttpFeed, JobTask::Prune);
    match h.run(&job, Utc::now()).await? {
        JobOutcome::Completed(JobSummary::Prune(report)) => Ok(report),
        other => panic!("expected a prune summary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prunes_stale_documents_below_threshold() -> Result<()> {
    let h = harness(&["e0", "e1", "e2", "e3", "e4", "e5"]).await;

    let report = prune(&h).await?;

    match report {
        PruneReport::Pruned { indexed, report } => {
            assert_eq!(indexed, 10);
            assert_eq!(report.deleted.len(), 4);
            assert!(report.failed.is_empty());
        },
        other => panic!("expected a prune, got {:?}", other),
    }
    assert!(h.documents.contains(&tenant(), "doc-e0").await);
    assert!(!h.documents.contains(&tenant(), "doc-e9").await);
    Ok(())
}

#[tokio::test]
async fn test_skips_when_stale_share_reaches_threshold() -> Result<()> {
    let h = harness(&["e0", "e1", "e2"]).await;

    let report = prune(&h).await?;

    assert_eq!(report, PruneReport::SkippedRatio { stale: 7, indexed: 10 });
    assert!(h.documents.contains(&tenant(), "doc-e9").await);
    assert!(h.search.deleted().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_skips_when_provider_reports_nothing() -> Result<()> {
    let h = harness(&[]).await;

    let report = prune(&h).await?;

    assert_eq!(report, PruneReport::SkippedEmptyProvider { indexed: 10 });
    Ok(())
}

#[tokio::test]
async fn test_pruning_keeps_referrer_counts_consistent() -> Result<()> {
    let live: Vec<String> = (0..9).map(|i| format!("e{}", i)).collect();
    let live: Vec<&str> = live.iter().map(String::as_str).collect();
    let h = harness(&live).await;

    // e9 is stale and cites e0 three times and e1 once
    h.documents.cite(&tenant(), "doc-e9", "doc-e0", 3).await;
    h.documents.cite(&tenant(), "doc-e9", "doc-e1", 1).await;
    h.search.set_referrer_count("doc-e0", 5).await;
    h.search.set_referrer_count("doc-e1", 1).await;

    prune(&h).await?;

    assert_eq!(h.search.referrer_count("doc-e0").await, 2);
    assert_eq!(h.search.referrer_count("doc-e1").await, 0);
    assert_eq!(h.search.deleted().await, vec!["doc-e9".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_stale_parent_is_deleted_after_its_children() -> Result<()> {
    let h = harness(&["e0", "e1", "e2", "e3", "e4", "e5", "e6", "e7", "e8"]).await;
    h.documents.insert(&tenant(), document("child", Some("e9"))).await;
    h.connector.set_items(
        ["e0", "e1", "e2", "e3", "e4", "e5", "e6", "e7", "e8", "child"]
            .iter()
            .map(|id| item(*id))
            .collect(),
    );

    prune(&h).await?;

    assert_eq!(
        h.search.deleted().await,
        vec!["doc-child".to_string(), "doc-e9".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_tenant_deletion_removes_everything_and_clears_cursors() -> Result<()> {
    let h = harness(&["e0"]).await;
    let synced = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    h.cursors
        .advance_timestamp(&tenant(), Source::HttpFeed, CursorKey::SyncedUntil, synced)
        .await?;

    // one stubborn document fails the first delivery and keeps the cursor
    h.documents.fail_deletion_of("doc-e5").await;
    let job = BackfillJob::new(tenant(), Source::HttpFeed, JobTask::DeleteTenantData);
    assert!(h.run(&job, Utc::now()).await.is_err());
    assert_eq!(
        h.cursors.synced_until(&tenant(), Source::HttpFeed).await?,
        Some(synced)
    );

    h.documents.clear_failures().await;
    h.run(&job, Utc::now()).await?;

    for i in 0..10 {
        assert!(!h.documents.contains(&tenant(), &format!("doc-e{}", i)).await);
    }
    assert_eq!(h.cursors.synced_until(&tenant(), Source::HttpFeed).await?, None);
    Ok(())
}

//! Backfill fan-out, progress and completion through the job runner

mod common;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use common::{items, tenant, FixtureConnector, Harness};
use conduit_common::types::Source;
use conduit_server::ingest::framework::cursor::SyncCursorStore;
use conduit_server::ingest::framework::progress::ProgressCounters;
use conduit_server::ingest::framework::types::{JobOutcome, JobSummary};
use conduit_server::ingest::{BackfillJob, JobTask};
use std::time::Duration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

fn root_job() -> BackfillJob {
    BackfillJob::new(tenant(), Source::HttpFeed, JobTask::Root { filter: None })
}

fn root_backfill(outcome: JobOutcome) -> conduit_common::types::BackfillId {
    match outcome {
        JobOutcome::Completed(JobSummary::Root(report)) => report.backfill_id,
        other => panic!("expected a root summary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_root_plans_children_before_sending_them() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(125)).with_batch_size(50));

    let backfill_id = root_backfill(h.run(&root_job(), now()).await?);

    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert_eq!(progress.total_ingest_jobs, 3);
    assert_eq!(progress.attempted_ingest_jobs, 0);

    let children = h.queued_jobs().await;
    assert_eq!(children.len(), 3);
    let mut sizes: Vec<usize> = children
        .iter()
        .map(|job| match &job.task {
            JobTask::Batch { items, .. } => items.len(),
            other => panic!("unexpected task {:?}", other),
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![25, 50, 50]);
    assert!(children.iter().all(|job| job.backfill_id == Some(backfill_id)));

    // children spread over distinct backfill lanes, spaced 30s apart
    let mut lanes = h.queued_lanes().await;
    lanes.dedup();
    assert_eq!(lanes.len(), 3);
    let mut starts: Vec<_> = children.iter().map(|job| job.start_timestamp).collect();
    starts.sort();
    assert_eq!(
        starts,
        vec![
            None,
            Some(now() + ChronoDuration::seconds(30)),
            Some(now() + ChronoDuration::seconds(60)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_root_resets_flag_and_advances_synced_until() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(3)));
    h.run(&root_job(), now()).await?;

    assert!(!h.cursors.full_backfill_complete(&tenant(), Source::HttpFeed).await?);
    assert_eq!(
        h.cursors.synced_until(&tenant(), Source::HttpFeed).await?,
        Some(now())
    );
    Ok(())
}

#[tokio::test]
async fn test_children_complete_in_any_order_and_notify_once() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(125)).with_batch_size(50));
    let backfill_id = root_backfill(h.run(&root_job(), now()).await?);

    let later = now() + ChronoDuration::minutes(5);
    let mut children = h.queued_jobs().await;
    children.reverse();
    for child in &children {
        h.run(child, later).await?;
    }

    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert_eq!(progress.attempted_ingest_jobs, 3);
    assert_eq!(progress.done_ingest_jobs, 3);
    assert_eq!(progress.total_index_jobs, 3);
    assert!(!progress.is_complete());
    assert!(h.notifier.completed().await.is_empty());
    assert_eq!(h.artifacts.len().await, 125);

    let mut index_done = BackfillJob::new(tenant(), Source::HttpFeed, JobTask::IndexProgress { index_jobs: 3 });
    index_done.backfill_id = Some(backfill_id);
    h.run(&index_done, later).await?;

    assert_eq!(h.notifier.completed().await.len(), 1);
    assert!(h.cursors.full_backfill_complete(&tenant(), Source::HttpFeed).await?);

    // redelivered child after completion does not notify again
    h.run(&children[0], later).await?;
    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert_eq!(progress.attempted_ingest_jobs, 4);
    assert_eq!(h.notifier.completed().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_partial_child_failure_still_completes() -> Result<()> {
    let connector = FixtureConnector::new(items(10)).with_batch_size(10);
    connector.fail_transiently("item-004");
    let h = Harness::new(connector);
    let backfill_id = root_backfill(h.run(&root_job(), now()).await?);

    let child = h.queued_jobs().await.remove(0);
    h.run(&child, now()).await?;

    let mut index_done = BackfillJob::new(tenant(), Source::HttpFeed, JobTask::IndexProgress { index_jobs: 1 });
    index_done.backfill_id = Some(backfill_id);
    h.run(&index_done, now()).await?;

    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert_eq!(progress.attempted_ingest_jobs, 1);
    assert_eq!(progress.done_ingest_jobs, 0);
    assert!(progress.completed_at.is_some());
    assert_eq!(h.artifacts.len().await, 9);
    assert_eq!(h.notifier.completed().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_early_child_is_rescheduled_without_side_effects() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(100)).with_batch_size(50));
    let backfill_id = root_backfill(h.run(&root_job(), now()).await?);

    let delayed = h
        .queued_jobs()
        .await
        .into_iter()
        .find(|job| job.start_timestamp.is_some())
        .unwrap();

    let outcome = h.run(&delayed, now()).await?;

    assert_eq!(outcome, JobOutcome::RescheduleAfter(Duration::from_secs(30)));
    assert!(h.artifacts.is_empty().await);
    assert!(h.indexing.requests().await.is_empty());
    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert_eq!(progress.attempted_ingest_jobs, 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_discovery_completes_immediately() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(Vec::new()));

    let backfill_id = root_backfill(h.run(&root_job(), now()).await?);

    assert!(h.queue.is_empty().await);
    let progress = h.counters.get(backfill_id, &tenant()).await?.unwrap();
    assert!(progress.completed_at.is_some());
    assert_eq!(h.notifier.completed().await.len(), 1);
    assert!(h.cursors.full_backfill_complete(&tenant(), Source::HttpFeed).await?);
    Ok(())
}

#[tokio::test]
async fn test_suppressed_backfill_sets_flag_without_notifying() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(Vec::new()));
    let mut job = root_job();
    job.suppress_notification = true;

    h.run(&job, now()).await?;

    assert!(h.notifier.completed().await.is_empty());
    assert!(h.cursors.full_backfill_complete(&tenant(), Source::HttpFeed).await?);
    Ok(())
}

#[tokio::test]
async fn test_redelivered_root_starts_a_new_backfill() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(10)).with_batch_size(5));

    let first = root_backfill(h.run(&root_job(), now()).await?);
    let second = root_backfill(h.run(&root_job(), now()).await?);

    assert_ne!(first, second);
    let recent = h.counters.list_recent(&tenant(), 10).await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].backfill_id, second.as_uuid());
    Ok(())
}

#[tokio::test]
async fn test_rerunning_a_child_converges_on_the_same_artifacts() -> Result<()> {
    let h = Harness::new(FixtureConnector::new(items(20)).with_batch_size(20));
    root_backfill(h.run(&root_job(), now()).await?);
    let child = h.queued_jobs().await.remove(0);

    h.run(&child, now()).await?;
    let first = h.artifacts.all().await;
    h.run(&child, now()).await?;
    let second = h.artifacts.all().await;

    assert_eq!(first.len(), 20);
    let ids = |artifacts: &[conduit_server::ingest::framework::types::Artifact]| {
        artifacts.iter().map(|a| a.entity_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    Ok(())
}

#[tokio::test]
async fn test_unconfigured_source_fails_the_job() {
    let h = Harness::new(FixtureConnector::new(items(1)));
    let job = BackfillJob::new(tenant(), Source::LocalDir, JobTask::Root { filter: None });

    assert!(h.run(&job, now()).await.is_err());
    assert!(h.queue.is_empty().await);
}

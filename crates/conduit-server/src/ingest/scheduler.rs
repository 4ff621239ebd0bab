//! Periodic scheduler
//!
//! Background task that enqueues an incremental poll and a prune pass for
//! every enabled source connection at fixed intervals. It only produces
//! messages; workers pick them up like any other job.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::IngestConfig;
use super::connections::ConnectionStore;
use super::producer::JobProducer;

pub struct PeriodicScheduler {
    connections: Arc<dyn ConnectionStore>,
    producer: Arc<JobProducer>,
    incremental_interval: Duration,
    prune_interval: Duration,
    check_count: usize,
}

impl PeriodicScheduler {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        producer: Arc<JobProducer>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            connections,
            producer,
            incremental_interval: config.incremental_interval(),
            prune_interval: config.prune_interval(),
            check_count: config.check_count,
        }
    }

    /// Spawn the scheduler loop
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            incremental_secs = self.incremental_interval.as_secs(),
            prune_secs = self.prune_interval.as_secs(),
            "Periodic scheduler started"
        );

        let mut incremental = interval_at(Instant::now(), self.incremental_interval);
        let mut prune = interval_at(Instant::now() + self.prune_interval, self.prune_interval);
        incremental.set_missed_tick_behavior(MissedTickBehavior::Skip);
        prune.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = incremental.tick() => {
                    if let Err(e) = self.enqueue_incremental().await {
                        warn!(error = %e, "Failed to schedule incremental polls");
                    }
                },
                _ = prune.tick() => {
                    if let Err(e) = self.enqueue_prune().await {
                        warn!(error = %e, "Failed to schedule prune passes");
                    }
                },
            }
        }

        info!("Periodic scheduler stopped");
    }

    /// One incremental poll per enabled connection
    pub async fn enqueue_incremental(&self) -> Result<usize> {
        let connections = self.connections.list_enabled().await?;
        for connection in &connections {
            self.producer
                .enqueue_incremental(&connection.tenant_id, connection.source, self.check_count)
                .await?;
        }
        Ok(connections.len())
    }

    /// One prune pass per enabled connection
    pub async fn enqueue_prune(&self) -> Result<usize> {
        let connections = self.connections.list_enabled().await?;
        for connection in &connections {
            self.producer
                .enqueue_prune(&connection.tenant_id, connection.source)
                .await?;
        }
        Ok(connections.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::connections::MemoryConnectionStore;
    use crate::ingest::lanes::LaneRouter;
    use crate::ingest::queue::MemoryJobQueue;
    use conduit_common::types::{Source, TenantId};

    async fn scheduler() -> (PeriodicScheduler, Arc<MemoryJobQueue>) {
        let connections = Arc::new(MemoryConnectionStore::new());
        let t1 = TenantId::parse("t1").unwrap();
        connections.set_enabled(&t1, Source::HttpFeed, true).await.unwrap();
        connections.set_enabled(&t1, Source::LocalDir, false).await.unwrap();

        let queue = Arc::new(MemoryJobQueue::new(Duration::from_secs(30)));
        let producer = Arc::new(JobProducer::new(queue.clone(), LaneRouter::default()));
        let config = IngestConfig {
            incremental_interval_secs: 60,
            prune_interval_secs: 3600,
            ..Default::default()
        };
        (PeriodicScheduler::new(connections, producer, &config), queue)
    }

    #[tokio::test]
    async fn test_enqueues_only_for_enabled_connections() {
        let (scheduler, queue) = scheduler().await;

        assert_eq!(scheduler.enqueue_incremental().await.unwrap(), 1);
        assert_eq!(scheduler.enqueue_prune().await.unwrap(), 1);

        let lanes: Vec<String> = queue.snapshot().await.into_iter().map(|(lane, _)| lane).collect();
        assert_eq!(lanes, vec!["admin:t1".to_string(), "incremental:t1:http_feed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_incremental_tick_is_immediate() {
        let (scheduler, queue) = scheduler().await;
        let shutdown = CancellationToken::new();
        let handle = scheduler.start(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let sent = queue.snapshot().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "incremental:t1:http_feed");
    }
}

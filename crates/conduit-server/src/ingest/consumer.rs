//! Job consumer
//!
//! Pulls messages, runs them with bounded concurrency and maps each result
//! onto the queue: completed jobs are acknowledged, jobs that are not yet due
//! are hidden again, failed jobs are left to reappear after the visibility
//! timeout.

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::framework::types::JobOutcome;
use super::jobs::BackfillJob;
use super::queue::{JobQueue, ReceivedMessage};
use super::runner::JobRunner;
use super::schedule::cap_visibility;

/// Pause after an empty or failed receive
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Rescheduled,
    Failed,
    Undecodable,
}

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    concurrency: usize,
    receive_batch: usize,
}

impl JobConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        concurrency: usize,
        receive_batch: usize,
    ) -> Self {
        Self {
            queue,
            runner,
            concurrency: concurrency.max(1),
            receive_batch: receive_batch.max(1),
        }
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            concurrency = self.concurrency,
            receive_batch = self.receive_batch,
            "Job consumer started"
        );

        loop {
            let handled = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.poll_once() => result,
            };

            let idle = match handled {
                Ok(dispositions) => dispositions.is_empty(),
                Err(e) => {
                    warn!(error = %e, "Failed to receive jobs");
                    true
                },
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_BACKOFF) => {},
                }
            }
        }

        info!("Job consumer stopped");
    }

    /// Receive one batch and handle every message in it
    pub async fn poll_once(&self) -> Result<Vec<Disposition>> {
        let messages = self.queue.receive(self.receive_batch).await?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = messages.len(), "Received jobs");

        let dispositions = futures::stream::iter(messages)
            .map(|message| self.handle(message))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        Ok(dispositions)
    }

    async fn handle(&self, message: ReceivedMessage) -> Disposition {
        let job: BackfillJob = match serde_json::from_str(&message.body) {
            Ok(job) => job,
            Err(e) => {
                // left in place; the queue's redrive policy moves it aside
                warn!(error = %e, "Undecodable job message");
                return Disposition::Undecodable;
            },
        };

        let job_id = Uuid::new_v4();
        match self.runner.run(&job, job_id, Utc::now()).await {
            Ok(JobOutcome::Completed(summary)) => {
                debug!(job_id = %job_id, ?summary, "Job completed");
                if let Err(e) = self.queue.ack(&message.receipt).await {
                    warn!(job_id = %job_id, error = %e, "Failed to acknowledge job");
                }
                Disposition::Acked
            },
            Ok(JobOutcome::RescheduleAfter(delay)) => {
                if let Err(e) = self
                    .queue
                    .extend_visibility(&message.receipt, cap_visibility(delay))
                    .await
                {
                    warn!(job_id = %job_id, error = %e, "Failed to reschedule job");
                }
                Disposition::Rescheduled
            },
            Err(e) => {
                error!(
                    job_id = %job_id,
                    tenant_id = %job.tenant_id,
                    source = %job.source,
                    task = job.task.name(),
                    error = ?e,
                    "Job failed, leaving it for redelivery"
                );
                Disposition::Failed
            },
        }
    }
}

//! AWS SQS FIFO transport
//!
//! Lanes map onto `MessageGroupId` and deduplication ids onto
//! `MessageDeduplicationId`, so sends sharing an id within SQS's five minute
//! window collapse into one delivery.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client as SqsClient;
use std::time::Duration;
use tracing::instrument;

use super::{JobQueue, OutgoingMessage, QueueError, QueueResult, ReceivedMessage};
use crate::ingest::schedule::cap_visibility;

/// SQS refuses more than ten messages per receive call
pub const MAX_RECEIVE_BATCH: usize = 10;

/// Long-poll wait per receive call
pub const RECEIVE_WAIT_SECS: i32 = 10;

#[derive(Clone)]
pub struct SqsJobQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsJobQueue {
    pub fn new(client: SqsClient, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client from the default AWS credential chain
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(SqsClient::new(&config), queue_url)
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

fn receive_batch_size(max_messages: usize) -> i32 {
    max_messages.clamp(1, MAX_RECEIVE_BATCH) as i32
}

fn visibility_seconds(timeout: Duration) -> i32 {
    cap_visibility(timeout).as_secs() as i32
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    #[instrument(level = "debug", skip(self, message), fields(lane = %message.lane))]
    async fn send(&self, message: OutgoingMessage) -> QueueResult<String> {
        let response = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_group_id(message.lane)
            .message_deduplication_id(message.deduplication_id)
            .message_body(message.body)
            .send()
            .await
            .map_err(|e| QueueError::Backend(format!("sqs send: {e}")))?;

        Ok(response.message_id.unwrap_or_default())
    }

    #[instrument(level = "debug", skip(self))]
    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(receive_batch_size(max_messages))
            .wait_time_seconds(RECEIVE_WAIT_SECS)
            .send()
            .await
            .map_err(|e| QueueError::Backend(format!("sqs receive: {e}")))?;

        Ok(response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| match (message.body, message.receipt_handle) {
                (Some(body), Some(receipt)) => Some(ReceivedMessage { body, receipt }),
                _ => None,
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self, receipt))]
    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Backend(format!("sqs delete: {e}")))?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, receipt))]
    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> QueueResult<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .visibility_timeout(visibility_seconds(timeout))
            .send()
            .await
            .map_err(|e| QueueError::Backend(format!("sqs visibility: {e}")))?;
        Ok(())
    }
}

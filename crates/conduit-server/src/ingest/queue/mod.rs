//! Job queue transport
//!
//! A FIFO, at-least-once queue partitioned into lanes. The core produces
//! lane-routed messages and consumes them idempotently; delivery order is
//! only guaranteed within a lane.

use async_trait::async_trait;
use conduit_common::digest::content_digest;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod sqs;

pub use memory::MemoryJobQueue;
pub use sqs::SqsJobQueue;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown or expired receipt: {0}")]
    UnknownReceipt(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Message ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub lane: String,
    /// Identical bodies sent close together are delivered once
    pub deduplication_id: String,
    pub body: String,
}

impl OutgoingMessage {
    /// Serialize `payload` and derive the deduplication id from its content
    pub fn json<T: serde::Serialize>(lane: impl Into<String>, payload: &T) -> QueueResult<Self> {
        let body = serde_json::to_string(payload)?;
        Ok(Self {
            lane: lane.into(),
            deduplication_id: content_digest(body.as_bytes()),
            body,
        })
    }

    /// Replace the content-derived id so the send is never merged with an
    /// identical one
    pub fn unique(mut self) -> Self {
        self.deduplication_id = Uuid::new_v4().simple().to_string();
        self
    }
}

/// Message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    /// Handle for ack and visibility changes; only valid for this delivery
    pub receipt: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the queue-assigned message id
    async fn send(&self, message: OutgoingMessage) -> QueueResult<String>;

    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<ReceivedMessage>>;

    /// Delete a processed message
    async fn ack(&self, receipt: &str) -> QueueResult<()>;

    /// Hide the message for `timeout` from now; implementations clamp to
    /// the queue maximum
    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> QueueResult<()>;
}

//! In-process FIFO queue
//!
//! Honours the same contract as the managed queue: per-lane FIFO, a lane is
//! blocked while its head message is in flight, visibility timeouts trigger
//! redelivery, and content-identical sends inside the deduplication window
//! are dropped. Used for local development and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{JobQueue, OutgoingMessage, QueueError, QueueResult, ReceivedMessage};
use crate::ingest::schedule::cap_visibility;

/// Window in which identical deduplication ids are dropped
pub const DEDUPLICATION_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    visible_at: Instant,
    receipt: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    lanes: BTreeMap<String, VecDeque<Entry>>,
    receipts: HashMap<String, String>,
    dedup: HashMap<String, (Instant, String)>,
}

#[derive(Debug)]
pub struct MemoryJobQueue {
    visibility_timeout: Duration,
    state: Mutex<State>,
}

impl MemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(State::default()),
        }
    }

    /// Messages still queued or in flight, as `(lane, body)` in lane order
    pub async fn snapshot(&self) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        state
            .lanes
            .iter()
            .flat_map(|(lane, entries)| {
                entries
                    .iter()
                    .map(move |entry| (lane.clone(), entry.body.clone()))
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.lanes.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn send(&self, message: OutgoingMessage) -> QueueResult<String> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        state
            .dedup
            .retain(|_, (sent_at, _)| now.duration_since(*sent_at) < DEDUPLICATION_WINDOW);
        if let Some((_, message_id)) = state.dedup.get(&message.deduplication_id) {
            return Ok(message_id.clone());
        }

        let message_id = Uuid::new_v4().to_string();
        state
            .dedup
            .insert(message.deduplication_id, (now, message_id.clone()));
        state.lanes.entry(message.lane).or_default().push_back(Entry {
            message_id: message_id.clone(),
            body: message.body,
            visible_at: now,
            receipt: None,
        });

        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let State {
            lanes, receipts, ..
        } = &mut *state;

        let mut delivered = Vec::new();
        for (lane, entries) in lanes.iter_mut() {
            if delivered.len() >= max_messages {
                break;
            }
            // only the head of a lane is deliverable
            let Some(head) = entries.front_mut() else {
                continue;
            };
            if head.visible_at > now {
                continue;
            }

            if let Some(stale) = head.receipt.take() {
                receipts.remove(&stale);
            }
            let receipt = format!("{}:{}", head.message_id, Uuid::new_v4().simple());
            head.receipt = Some(receipt.clone());
            head.visible_at = now + self.visibility_timeout;
            receipts.insert(receipt.clone(), lane.clone());

            delivered.push(ReceivedMessage {
                body: head.body.clone(),
                receipt,
            });
        }

        Ok(delivered)
    }

    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let lane = state
            .receipts
            .remove(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;

        let entries = state
            .lanes
            .get_mut(&lane)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;
        match entries.front() {
            Some(head) if head.receipt.as_deref() == Some(receipt) => {
                entries.pop_front();
            },
            _ => return Err(QueueError::UnknownReceipt(receipt.to_string())),
        }
        if entries.is_empty() {
            state.lanes.remove(&lane);
        }

        Ok(())
    }

    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> QueueResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let lane = state
            .receipts
            .get(receipt)
            .cloned()
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;

        let head = state
            .lanes
            .get_mut(&lane)
            .and_then(|entries| entries.front_mut())
            .filter(|head| head.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;
        head.visible_at = now + cap_visibility(timeout);

        Ok(())
    }
}

//! In-process queue for dry runs and tests.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chap_models::NewVideoMessage;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::message::{decode_payload, encode_payload, Delivery, NackOutcome};
use crate::MessageQueue;

#[derive(Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Delivery>,
    /// id -> (delivery, failed attempts)
    pending: BTreeMap<String, (Delivery, u32)>,
    dead: Vec<(Delivery, String)>,
}

/// Queue held in memory with the same ack/nack/claim semantics as Redis,
/// except that nacked messages are immediately claimable.
pub struct MemoryQueue {
    max_retries: u32,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            state: Mutex::new(State::default()),
        }
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.state.lock().await.pending.keys().cloned().collect()
    }

    /// Dead-lettered messages with their last error.
    pub async fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.state.lock().await.dead.clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, message: &NewVideoMessage) -> QueueResult<String> {
        let payload = encode_payload(message)?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        let delivery = decode_payload(&id, payload.as_bytes())
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;
        state.ready.push_back(delivery);
        Ok(id)
    }

    async fn pull(&self, max_messages: usize, _block: Duration) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let take = max_messages.min(state.ready.len());
        let batch: Vec<Delivery> = state.ready.drain(..take).collect();
        for delivery in &batch {
            state
                .pending
                .insert(delivery.id.clone(), (delivery.clone(), 0));
        }
        Ok(batch)
    }

    async fn ack_batch(&self, message_ids: &[String]) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        for id in message_ids {
            state.pending.remove(id);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<NackOutcome> {
        let mut state = self.state.lock().await;
        let attempts = match state.pending.get_mut(&delivery.id) {
            Some((_, attempts)) => {
                *attempts += 1;
                *attempts
            }
            None => return Ok(NackOutcome::Pending { attempts: 0 }),
        };
        if attempts >= self.max_retries {
            if let Some((delivery, _)) = state.pending.remove(&delivery.id) {
                state.dead.push((delivery, error.to_string()));
            }
            return Ok(NackOutcome::DeadLettered);
        }
        Ok(NackOutcome::Pending { attempts })
    }

    async fn claim_stale(&self, max_messages: usize) -> QueueResult<Vec<Delivery>> {
        let state = self.state.lock().await;
        Ok(state
            .pending
            .values()
            .filter(|(_, attempts)| *attempts > 0)
            .take(max_messages)
            .map(|(delivery, _)| delivery.clone())
            .collect())
    }

    fn describe(&self) -> String {
        "in-memory queue".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pull_ack_removes_messages() {
        let queue = MemoryQueue::default();
        queue.publish(&NewVideoMessage::new("a")).await.unwrap();
        queue.publish(&NewVideoMessage::new("b")).await.unwrap();
        queue.publish(&NewVideoMessage::new("c")).await.unwrap();

        let batch = queue.pull(2, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].video_id.as_str(), "a");
        assert_eq!(queue.ready_len().await, 1);

        queue.ack_batch(&[batch[0].id.clone()]).await.unwrap();
        assert_eq!(queue.pending_ids().await, vec![batch[1].id.clone()]);
    }

    #[tokio::test]
    async fn test_nack_redelivers_then_dead_letters() {
        let queue = MemoryQueue::new(2);
        queue.publish(&NewVideoMessage::new("a")).await.unwrap();
        let delivery = queue.pull(10, Duration::ZERO).await.unwrap().remove(0);

        assert!(queue.claim_stale(10).await.unwrap().is_empty());
        assert_eq!(
            queue.nack(&delivery, "boom").await.unwrap(),
            NackOutcome::Pending { attempts: 1 }
        );
        let reclaimed = queue.claim_stale(10).await.unwrap();
        assert_eq!(reclaimed, vec![delivery.clone()]);

        assert_eq!(queue.nack(&delivery, "boom again").await.unwrap(), NackOutcome::DeadLettered);
        assert!(queue.pending_ids().await.is_empty());
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "boom again");
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_video_id() {
        let queue = MemoryQueue::default();
        assert!(matches!(
            queue.publish(&NewVideoMessage::new("")).await,
            Err(QueueError::PublishFailed(_))
        ));
    }
}

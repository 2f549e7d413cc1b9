//! New-video message queue.
//!
//! This crate provides:
//! - Publishing new-video messages to a Redis stream
//! - Consumer-group pulls with batch acknowledge
//! - Negative acknowledge with retry counting and a dead-letter stream
//! - Reclaiming entries left pending by crashed or failing consumers

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;

use std::time::Duration;

use async_trait::async_trait;
use chap_models::NewVideoMessage;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{Delivery, NackOutcome};
pub use queue::{QueueConfig, RedisQueue};

/// Pull-acknowledge message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a message; returns its entry id.
    async fn publish(&self, message: &NewVideoMessage) -> QueueResult<String>;

    /// Up to `max_messages` new messages, waiting at most `block` for the first.
    async fn pull(&self, max_messages: usize, block: Duration) -> QueueResult<Vec<Delivery>>;

    async fn ack_batch(&self, message_ids: &[String]) -> QueueResult<()>;

    /// Record a failed attempt; the message stays pending or is dead-lettered.
    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<NackOutcome>;

    /// Take over messages left pending past the visibility timeout.
    async fn claim_stale(&self, max_messages: usize) -> QueueResult<Vec<Delivery>>;

    fn describe(&self) -> String;
}

//! Queue consumer.
//!
//! Messages are handled one at a time. A message is acknowledged once the
//! pipeline returns `Ok` (completed, skipped or recorded as failed); an `Err`
//! means no terminal state reached the ledger, so the message is nacked and
//! stays pending for redelivery. Queue errors while acknowledging are logged
//! and never stop the consumer; an unacknowledged message is simply
//! delivered again.

use std::sync::Arc;
use std::time::Duration;

use chap_queue::{Delivery, MessageQueue, NackOutcome};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::pipeline::{Pipeline, ProcessOutcome};

/// Pause after a failed pull or claim.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Counters for one batch (or a whole daemon run).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Left pending or dead-lettered because the ledger could not be updated.
    pub nacked: usize,
}

impl BatchSummary {
    fn absorb(&mut self, other: &BatchSummary) {
        self.received += other.received;
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.nacked += other.nacked;
    }
}

pub struct Executor {
    config: WorkerConfig,
    queue: Arc<dyn MessageQueue>,
    pipeline: Arc<Pipeline>,
    shutdown: watch::Sender<bool>,
}

impl Executor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn MessageQueue>, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue,
            pipeline,
            shutdown,
        }
    }

    /// Pull one batch, process it and return.
    pub async fn run_once(&self) -> WorkerResult<BatchSummary> {
        info!(
            queue = %self.queue.describe(),
            max = self.config.pull_batch,
            timeout_secs = self.config.pull_timeout.as_secs(),
            "Pulling messages"
        );
        let deliveries = self
            .queue
            .pull(self.config.pull_batch, self.config.pull_timeout)
            .await?;

        if deliveries.is_empty() {
            info!("No messages to process");
            return Ok(BatchSummary::default());
        }

        let summary = self.handle_batch(deliveries).await;
        info!(
            received = summary.received,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            nacked = summary.nacked,
            "Batch finished"
        );
        Ok(summary)
    }

    /// Consume until [`Self::shutdown`] is called, reclaiming stale
    /// messages every `claim_interval`.
    pub async fn run(&self) -> WorkerResult<BatchSummary> {
        info!(
            queue = %self.queue.describe(),
            claim_interval_secs = self.config.claim_interval.as_secs(),
            "Starting daemon loop"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_tick = tokio::time::interval(self.config.claim_interval);
        let mut total = BatchSummary::default();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                _ = claim_tick.tick() => {
                    match self.queue.claim_stale(self.config.pull_batch).await {
                        Ok(claimed) if !claimed.is_empty() => {
                            info!("Claimed {} stale messages", claimed.len());
                            total.absorb(&self.handle_batch(claimed).await);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Failed to claim stale messages: {}", e);
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
                pulled = self.queue.pull(self.config.pull_batch, self.config.pull_timeout) => {
                    match pulled {
                        Ok(deliveries) if !deliveries.is_empty() => {
                            debug!("Pulled {} messages", deliveries.len());
                            total.absorb(&self.handle_batch(deliveries).await);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Error pulling messages: {}", e);
                            tokio::time::sleep(ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!(
            received = total.received,
            completed = total.completed,
            failed = total.failed,
            "Executor stopped"
        );
        Ok(total)
    }

    /// Signal the daemon loop to stop after the current message.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A handle that stops the daemon loop when sent `true`.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Process deliveries in order; successes are acknowledged together.
    async fn handle_batch(&self, deliveries: Vec<Delivery>) -> BatchSummary {
        let mut summary = BatchSummary {
            received: deliveries.len(),
            ..BatchSummary::default()
        };
        let mut acked = Vec::with_capacity(deliveries.len());

        for delivery in &deliveries {
            match self.pipeline.process(&delivery.message).await {
                Ok(outcome) => {
                    match outcome {
                        ProcessOutcome::Completed { .. } => summary.completed += 1,
                        ProcessOutcome::Skipped => summary.skipped += 1,
                        ProcessOutcome::Failed { .. } => summary.failed += 1,
                    }
                    acked.push(delivery.id.clone());
                }
                Err(e) => {
                    summary.nacked += 1;
                    error!(
                        message_id = %delivery.id,
                        video_id = %delivery.video_id,
                        "Message not acknowledged: {}", e
                    );
                    self.nack(delivery, &e.to_string()).await;
                }
            }
        }

        if !acked.is_empty() {
            match self.queue.ack_batch(&acked).await {
                Ok(()) => metrics::record_messages("acked", acked.len()),
                Err(e) => {
                    metrics::record_messages("ack_failed", acked.len());
                    error!(count = acked.len(), "Failed to acknowledge messages: {}", e);
                }
            }
        }
        summary
    }

    async fn nack(&self, delivery: &Delivery, reason: &str) {
        match self.queue.nack(delivery, reason).await {
            Ok(NackOutcome::Pending { attempts }) => {
                metrics::record_messages("nacked", 1);
                info!(message_id = %delivery.id, attempts, "Message left pending for redelivery");
            }
            Ok(NackOutcome::DeadLettered) => {
                metrics::record_messages("dead_lettered", 1);
                warn!(message_id = %delivery.id, "Message moved to dead-letter stream");
            }
            Err(e) => {
                metrics::record_messages("nack_failed", 1);
                error!(message_id = %delivery.id, "Failed to nack message: {}", e);
            }
        }
    }
}

//! Redis Streams queue.
//!
//! Consumers read through a consumer group, so an entry stays in the group's
//! pending list until it is acknowledged. Entries whose consumer died or
//! negatively acknowledged them are reclaimed with `XCLAIM` after
//! `visibility_timeout`; after `max_retries` failed attempts they move to the
//! dead-letter stream.

use std::time::Duration;

use async_trait::async_trait;
use chap_models::NewVideoMessage;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::{decode_entry, encode_payload, raw_payload, Delivery, NackOutcome, DATA_FIELD};
use crate::MessageQueue;

/// Retry counters expire after a day.
const RETRY_KEY_TTL_SECS: i64 = 86_400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying new-video messages
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// This worker's consumer name within the group
    pub consumer_name: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Failed attempts before dead-lettering
    pub max_retries: u32,
    /// Idle time after which a pending entry may be reclaimed
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "sf6:videos".to_string(),
            consumer_group: "sf6:chapter-workers".to_string(),
            consumer_name: format!("worker-{}", uuid::Uuid::new_v4()),
            dlq_stream_name: "sf6:videos:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.stream_name, message_id)
    }
}

/// Queue client backed by Redis Streams.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(format!("{}: {}", config.redis_url, e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create the consumer group (and stream) if missing.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> QueueResult<()> {
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .query_async::<()>(conn)
            .await?;
        self.ack_ids(conn, &[message_id.to_string()]).await?;
        conn.del::<_, ()>(self.config.retry_key(message_id)).await?;
        warn!(message_id, "Moved message to DLQ: {}", error);
        Ok(())
    }

    async fn ack_ids(&self, conn: &mut MultiplexedConnection, ids: &[String]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(ids)
            .query_async::<()>(conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(ids)
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }

    /// Decode entries, dead-lettering the ones that can never be processed.
    async fn decode_entries(
        &self,
        conn: &mut MultiplexedConnection,
        entries: Vec<redis::streams::StreamId>,
    ) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_entry(&entry.id, &entry.map) {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => {
                    let payload = raw_payload(&entry.map);
                    self.dead_letter(conn, &entry.id, &payload, &e.to_string()).await?;
                }
            }
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn publish(&self, message: &NewVideoMessage) -> QueueResult<String> {
        message
            .validate()
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;
        let mut conn = self.conn().await?;
        let payload = encode_payload(message)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(video_id = %message.video_id, message_id = %message_id, "Published message");
        Ok(message_id)
    }

    async fn pull(&self, max_messages: usize, block: Duration) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(max_messages)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries: Vec<_> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        if entries.is_empty() {
            debug!("No messages within {:?}", block);
            return Ok(Vec::new());
        }
        self.decode_entries(&mut conn, entries).await
    }

    async fn ack_batch(&self, message_ids: &[String]) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.ack_ids(&mut conn, message_ids).await?;
        for id in message_ids {
            conn.del::<_, ()>(self.config.retry_key(id)).await?;
        }
        if !message_ids.is_empty() {
            info!("Acknowledged {} messages", message_ids.len());
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<NackOutcome> {
        let mut conn = self.conn().await?;

        let key = self.config.retry_key(&delivery.id);
        let attempts: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_KEY_TTL_SECS).await?;

        if attempts >= self.config.max_retries {
            let payload = encode_payload(&delivery.message)?;
            self.dead_letter(&mut conn, &delivery.id, &payload, error).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        warn!(
            video_id = %delivery.video_id,
            message_id = %delivery.id,
            attempts,
            "Message left pending for redelivery: {}",
            error
        );
        Ok(NackOutcome::Pending { attempts })
    }

    async fn claim_stale(&self, max_messages: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max_messages)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();

        let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        info!("Claimed {} stale messages", claimed.ids.len());
        self.decode_entries(&mut conn, claimed.ids).await
    }

    fn describe(&self) -> String {
        format!("redis stream {}", self.config.stream_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("QUEUE_STREAM", "test:videos");
        std::env::set_var("QUEUE_MAX_RETRIES", "5");
        std::env::set_var("QUEUE_VISIBILITY_TIMEOUT", "bogus");

        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "test:videos");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));
        assert_eq!(config.retry_key("1-0"), "test:videos:retry:1-0");

        for key in ["QUEUE_STREAM", "QUEUE_MAX_RETRIES", "QUEUE_VISIBILITY_TIMEOUT"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_invalid_url_is_connection_error() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..QueueConfig::default()
        };
        assert!(matches!(
            RedisQueue::new(config),
            Err(QueueError::ConnectionFailed(_))
        ));
    }
}

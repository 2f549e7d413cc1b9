//! Stream entry encoding for new-video messages.
//!
//! Each entry carries the JSON payload in its `data` field, the same bytes the
//! producer publishes.

use std::collections::HashMap;

use chap_models::{NewVideoMessage, VideoId};

use crate::error::{QueueError, QueueResult};

/// Field holding the JSON payload.
pub const DATA_FIELD: &str = "data";

/// A message handed to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Stream entry id
    pub id: String,
    pub video_id: VideoId,
    pub message: NewVideoMessage,
}

/// Outcome of a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Left pending; redelivered once reclaimed.
    Pending { attempts: u32 },
    /// Retries exhausted; moved to the dead-letter stream.
    DeadLettered,
}

pub fn encode_payload(message: &NewVideoMessage) -> QueueResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode and validate a payload.
pub fn decode_payload(id: &str, payload: &[u8]) -> QueueResult<Delivery> {
    let message: NewVideoMessage = serde_json::from_slice(payload)
        .map_err(|e| QueueError::invalid_message(id, e.to_string()))?;
    let video_id = message
        .validate()
        .map_err(|e| QueueError::invalid_message(id, e.to_string()))?;
    Ok(Delivery {
        id: id.to_string(),
        video_id,
        message,
    })
}

/// Decode a stream entry's field map.
pub fn decode_entry(id: &str, fields: &HashMap<String, redis::Value>) -> QueueResult<Delivery> {
    match fields.get(DATA_FIELD) {
        Some(redis::Value::BulkString(payload)) => decode_payload(id, payload),
        Some(redis::Value::SimpleString(payload)) => decode_payload(id, payload.as_bytes()),
        Some(_) => Err(QueueError::invalid_message(id, "data field is not a string")),
        None => Err(QueueError::invalid_message(id, "missing data field")),
    }
}

/// Raw payload of an entry for dead-lettering, whatever its shape.
pub fn raw_payload(fields: &HashMap<String, redis::Value>) -> String {
    match fields.get(DATA_FIELD) {
        Some(redis::Value::BulkString(payload)) => String::from_utf8_lossy(payload).into_owned(),
        Some(redis::Value::SimpleString(payload)) => payload.clone(),
        _ => String::new(),
    }
}

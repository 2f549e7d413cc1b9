//! Video identifiers and the queue payload announcing a new upload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// YouTube video identifier, used as the key of every per-item record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical watch URL for this video.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors raised when a queue payload is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("videoId is missing or empty")]
    MissingVideoId,

    #[error("videoId contains invalid characters: {0}")]
    InvalidVideoId(String),
}

/// Payload published for every newly discovered upload.
///
/// Field names follow the producer's camelCase wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewVideoMessage {
    #[serde(default)]
    pub video_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub channel_id: String,

    #[serde(default)]
    pub channel_title: String,

    #[serde(default)]
    pub published_at: String,
}

impl NewVideoMessage {
    /// Create a message carrying only the video id.
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            title: String::new(),
            channel_id: String::new(),
            channel_title: String::new(),
            published_at: String::new(),
        }
    }

    /// Validate the payload and return its video id.
    pub fn validate(&self) -> Result<VideoId, MessageError> {
        let id = self.video_id.trim();
        if id.is_empty() {
            return Err(MessageError::MissingVideoId);
        }

        // Ids end up in object keys and file names.
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(MessageError::InvalidVideoId(id.to_string()));
        }

        Ok(VideoId::from(id))
    }
}

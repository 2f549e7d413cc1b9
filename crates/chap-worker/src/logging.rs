//! Structured per-video logging.
//!
//! Every lifecycle event of one video carries the same `video_id` and
//! `operation` fields, so a single video can be followed through JSON logs.

use tracing::{error, info, warn, Span};

use chap_models::VideoId;

/// Lifecycle logger for one video.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(video_id: &VideoId, operation: &str) -> Self {
        Self::from_string(video_id.as_str(), operation)
    }

    pub fn from_string(video_id: &str, operation: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Started processing: {}", message
        );
    }

    /// Log a numbered pipeline step, e.g. `[2/6] Detecting match scenes`.
    pub fn log_step(&self, step: usize, total: usize, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            step,
            "[{}/{}] {}", step, total, message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            "{}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Processing failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Finished: {}", message
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the video id for nested logs.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "video",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

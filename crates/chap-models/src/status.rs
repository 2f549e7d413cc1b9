//! Per-video processing status.
//!
//! The ledger stores one [`ProcessingRecord`] per video id. Statuses move
//! `queued -> processing -> completed`, or `processing -> failed`, and a failed
//! item may be picked up again (`failed -> processing`).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing status of a single video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Announced but not picked up yet (also the implicit state of unknown items)
    #[default]
    Queued,
    /// A worker is processing the video
    Processing,
    /// Chapters and tables were written
    Completed,
    /// The last attempt failed; eligible for retry
    Failed,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 4] = [
        ProcessingStatus::Queued,
        ProcessingStatus::Processing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Completed items are never processed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed)
    }

    /// Whether the ledger may move from `self` to `next`.
    ///
    /// Entering `processing` is idempotent and allowed from every non-completed
    /// state.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (_, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Queued, Queued) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ProcessingStatus::Queued),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

/// Ledger record for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub video_id: String,

    #[serde(default)]
    pub status: ProcessingStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u32>,
}

impl ProcessingRecord {
    /// A fresh, implicitly queued record.
    pub fn queued(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            status: ProcessingStatus::Queued,
            title: None,
            channel_id: None,
            channel_title: None,
            published_at: None,
            queued_at: None,
            processing_started_at: None,
            completed_at: None,
            failed_at: None,
            updated_at: None,
            error_message: None,
            match_count: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}

/// Count of ledger records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ProcessingStats {
    pub fn set(&mut self, status: ProcessingStatus, count: u64) {
        match status {
            ProcessingStatus::Queued => self.queued = count,
            ProcessingStatus::Processing => self.processing = count,
            ProcessingStatus::Completed => self.completed = count,
            ProcessingStatus::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ProcessingStatus::ALL {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("stale".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use ProcessingStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_only_completed_is_terminal() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(!ProcessingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut record = ProcessingRecord::queued("vid");
        record.status = ProcessingStatus::Failed;
        record.error_message = Some("boom".into());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["videoId"], "vid");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errorMessage"], "boom");
        assert!(json.get("completedAt").is_none());
    }

    #[test]
    fn test_stats_total() {
        let mut stats = ProcessingStats::default();
        stats.set(ProcessingStatus::Completed, 3);
        stats.set(ProcessingStatus::Failed, 2);
        assert_eq!(stats.total(), 5);
    }
}

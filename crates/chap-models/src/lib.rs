//! Shared data models for the chapter worker.
//!
//! This crate provides Serde-serializable types for:
//! - Video ids and the new-video queue message
//! - Per-video processing status records
//! - Match, chapter and video output records
//! - Detection summaries
//! - Chapter timestamp formatting

pub mod detection;
pub mod matches;
pub mod status;
pub mod timestamp;
pub mod video;

// Re-export common types
pub use detection::{DetectionEntry, DetectionSummary};
pub use matches::{
    Chapter, DetectionStats, MatchRecord, PlayerLabels, PlayerSide, PlayerSlot, VideoRecord,
    UNKNOWN_CHARACTER,
};
pub use status::{ProcessingRecord, ProcessingStats, ProcessingStatus};
pub use timestamp::format_timestamp;
pub use video::{MessageError, NewVideoMessage, VideoId};

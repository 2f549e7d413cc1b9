//! Match, chapter and per-video output records.
//!
//! These are the rows written to the tabular sink and the JSON objects
//! published next to them. Field names are camelCase to match the
//! consumers reading the tables.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label used when a character could not be recognized.
pub const UNKNOWN_CHARACTER: &str = "Unknown";

/// Character labels for both sides of one match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlayerLabels {
    #[serde(rename = "1p", default)]
    pub p1: String,

    #[serde(rename = "2p", default)]
    pub p2: String,
}

impl PlayerLabels {
    pub fn new(p1: impl Into<String>, p2: impl Into<String>) -> Self {
        Self {
            p1: p1.into(),
            p2: p2.into(),
        }
    }
}

/// Screen side of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSide {
    Left,
    Right,
}

/// One player's slot in a match record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    pub character: String,
    pub character_raw: String,
    pub side: PlayerSide,
}

/// One detected match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    /// `{videoId}_{whole seconds}`
    pub id: String,
    pub video_id: String,
    /// Whole seconds from the start of the video
    pub start_time: u64,
    pub player1: PlayerSlot,
    pub player2: PlayerSlot,
    pub detected_at: DateTime<Utc>,
    pub confidence: f64,
    pub template_match_score: f64,
    /// Frame index of the accepted detection
    pub frame_timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_frame_path: Option<String>,
}

impl MatchRecord {
    /// Build the id used for a match starting at `timestamp` seconds.
    pub fn match_id(video_id: &str, timestamp: f64) -> String {
        format!("{}_{}", video_id, whole_seconds(timestamp))
    }

    /// Build a record from a detection and its recognized labels.
    pub fn new(
        video_id: &str,
        timestamp: f64,
        frame_index: u64,
        confidence: f64,
        labels: &PlayerLabels,
        raw: &PlayerLabels,
    ) -> Self {
        Self {
            id: Self::match_id(video_id, timestamp),
            video_id: video_id.to_string(),
            start_time: whole_seconds(timestamp),
            player1: PlayerSlot {
                character: non_empty_or_unknown(&labels.p1),
                character_raw: raw.p1.clone(),
                side: PlayerSide::Left,
            },
            player2: PlayerSlot {
                character: non_empty_or_unknown(&labels.p2),
                character_raw: raw.p2.clone(),
                side: PlayerSide::Right,
            },
            detected_at: Utc::now(),
            confidence,
            template_match_score: confidence,
            frame_timestamp: frame_index,
            saved_frame_path: None,
        }
    }
}

/// A chapter marker for the video description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Whole seconds from the start of the video
    pub start_time: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

impl Chapter {
    /// Chapter for the `ordinal`-th (1-based) match.
    pub fn for_match(ordinal: usize, record: &MatchRecord) -> Self {
        Self {
            start_time: record.start_time,
            title: Self::title(ordinal, &record.player1.character, &record.player2.character),
            match_id: Some(record.id.clone()),
        }
    }

    /// Title format: `第01戦 Ryu VS Ken`.
    pub fn title(ordinal: usize, p1: &str, p2: &str) -> String {
        format!("第{:02}戦 {} VS {}", ordinal, p1, p2)
    }
}

/// Detection counters published with the video record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub total_frames: u64,
    pub matched_frames: u64,
}

/// Per-video output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default)]
    pub published_at: String,
    pub processed_at: DateTime<Utc>,
    pub chapters: Vec<Chapter>,
    pub detection_stats: DetectionStats,
}

fn whole_seconds(timestamp: f64) -> u64 {
    if timestamp.is_finite() && timestamp > 0.0 {
        timestamp.floor() as u64
    } else {
        0
    }
}

fn non_empty_or_unknown(label: &str) -> String {
    let label = label.trim();
    if label.is_empty() {
        UNKNOWN_CHARACTER.to_string()
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> MatchRecord {
        MatchRecord::new(
            "vid",
            125.7,
            3771,
            0.61,
            &PlayerLabels::new("Ryu", "Ken"),
            &PlayerLabels::new("リュウ", "ケン"),
        )
    }

    #[test]
    fn test_match_id_truncates_seconds() {
        assert_eq!(MatchRecord::match_id("vid", 125.7), "vid_125");
        assert_eq!(MatchRecord::match_id("vid", 0.2), "vid_0");
    }

    #[test]
    fn test_match_record_fields() {
        let record = sample_record();
        assert_eq!(record.start_time, 125);
        assert_eq!(record.frame_timestamp, 3771);
        assert_eq!(record.player1.side, PlayerSide::Left);
        assert_eq!(record.player2.character_raw, "ケン");
        assert_eq!(record.template_match_score, record.confidence);
    }

    #[test]
    fn test_empty_label_becomes_unknown() {
        let record = MatchRecord::new(
            "vid",
            1.0,
            30,
            0.5,
            &PlayerLabels::new("", "Ken"),
            &PlayerLabels::default(),
        );
        assert_eq!(record.player1.character, UNKNOWN_CHARACTER);
    }

    #[test]
    fn test_chapter_title_format() {
        let chapter = Chapter::for_match(3, &sample_record());
        assert_eq!(chapter.title, "第03戦 Ryu VS Ken");
        assert_eq!(chapter.start_time, 125);
        assert_eq!(chapter.match_id.as_deref(), Some("vid_125"));
    }

    #[test]
    fn test_labels_wire_names() {
        let json = serde_json::to_value(PlayerLabels::new("Ryu", "Ken")).unwrap();
        assert_eq!(json["1p"], "Ryu");
        assert_eq!(json["2p"], "Ken");
    }

    #[test]
    fn test_match_record_serializes_camel_case() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["videoId"], "vid");
        assert_eq!(json["player1"]["characterRaw"], "リュウ");
        assert_eq!(json["player1"]["side"], "left");
        assert!(json.get("savedFramePath").is_none());
    }
}

//! Detection summary written after a scan.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One accepted detection, without its pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEntry {
    /// 1-based position in the scan output
    pub index: usize,
    pub timestamp: f64,
    pub frame_number: u64,
    pub confidence: f64,
}

/// Summary of a scan, persisted as `detection_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub video_id: String,
    pub detected_at: DateTime<Utc>,
    pub total_detections: usize,
    pub detections: Vec<DetectionEntry>,

    /// Set when the scan aborted and only partial results were kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at_frame: Option<u64>,

    /// Frames decoded by the scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
}

impl DetectionSummary {
    /// Build a summary from `(timestamp, frame_index, confidence)` triples.
    pub fn new(video_id: impl Into<String>, hits: impl IntoIterator<Item = (f64, u64, f64)>) -> Self {
        let detections: Vec<DetectionEntry> = hits
            .into_iter()
            .enumerate()
            .map(|(i, (timestamp, frame_number, confidence))| DetectionEntry {
                index: i + 1,
                timestamp,
                frame_number,
                confidence,
            })
            .collect();

        Self {
            video_id: video_id.into(),
            detected_at: Utc::now(),
            total_detections: detections.len(),
            detections,
            aborted_at_frame: None,
            total_frames: None,
        }
    }

    pub fn with_abort(mut self, frame_index: u64) -> Self {
        self.aborted_at_frame = Some(frame_index);
        self
    }

    pub fn with_total_frames(mut self, frames: u64) -> Self {
        self.total_frames = Some(frames);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_indexes_from_one() {
        let summary = DetectionSummary::new("vid", vec![(10.0, 300, 0.5), (95.5, 2865, 0.41)]);
        assert_eq!(summary.total_detections, 2);
        assert_eq!(summary.detections[0].index, 1);
        assert_eq!(summary.detections[1].frame_number, 2865);
    }

    #[test]
    fn test_summary_wire_format() {
        let summary = DetectionSummary::new("vid", vec![(10.0, 300, 0.5)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["videoId"], "vid");
        assert_eq!(json["totalDetections"], 1);
        assert_eq!(json["detections"][0]["frameNumber"], 300);
        assert!(json.get("abortedAtFrame").is_none());
        assert!(json.get("totalFrames").is_none());

        let json = serde_json::to_value(summary.with_abort(999)).unwrap();
        assert_eq!(json["abortedAtFrame"], 999);
    }

    #[test]
    fn test_summary_without_frame_count_still_loads() {
        let json = r#"{"videoId":"vid","detectedAt":"2024-05-01T12:00:00Z","totalDetections":0,"detections":[]}"#;
        let summary: DetectionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.total_frames, None);
        assert_eq!(summary.with_total_frames(1800).total_frames, Some(1800));
    }
}

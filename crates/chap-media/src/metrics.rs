//! Scan metrics.
//!
//! - Decoded and sampled frame counters
//! - Candidate rejections by reason
//! - Accepted detections and scan duration

use metrics::{counter, histogram};

use crate::matcher::ScanStats;

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Frames decoded by the scanner (sampled or not).
    pub const FRAMES_DECODED_TOTAL: &str = "scan_frames_decoded_total";

    /// Frames correlated against the positive pattern.
    pub const FRAMES_SAMPLED_TOTAL: &str = "scan_frames_sampled_total";

    /// Candidates dropped, labelled by `reason`.
    pub const REJECTS_TOTAL: &str = "scan_rejects_total";

    /// Accepted detections.
    pub const DETECTIONS_TOTAL: &str = "scan_detections_total";

    /// Wall time of a full scan in seconds.
    pub const DURATION_SECONDS: &str = "scan_duration_seconds";
}

/// Reject reason labels.
pub mod reasons {
    pub const DECOY: &str = "decoy";
    pub const DEDUP: &str = "dedup";
    pub const LOOKAHEAD: &str = "lookahead";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record the counters of a finished (or aborted) scan.
pub fn record_scan(stats: &ScanStats) {
    counter!(names::FRAMES_DECODED_TOTAL).increment(stats.frames_decoded);
    counter!(names::FRAMES_SAMPLED_TOTAL).increment(stats.frames_sampled);

    for (reason, count) in [
        (reasons::DECOY, stats.rejected_decoy),
        (reasons::DEDUP, stats.rejected_dedup),
        (reasons::LOOKAHEAD, stats.rejected_lookahead),
    ] {
        counter!(names::REJECTS_TOTAL, "reason" => reason).increment(count);
    }

    counter!(names::DETECTIONS_TOTAL).increment(stats.accepted);
    histogram!(names::DURATION_SECONDS).record(stats.elapsed.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::FRAMES_DECODED_TOTAL.starts_with("scan_"));
        assert!(names::REJECTS_TOTAL.contains("rejects"));
        assert!(names::DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_scan(&ScanStats::default());
    }
}

//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    /// Videos by outcome (`completed`, `failed`, `skipped`).
    pub const VIDEOS_TOTAL: &str = "chap_videos_total";
    pub const VIDEO_DURATION_SECONDS: &str = "chap_video_duration_seconds";
    pub const MATCHES_TOTAL: &str = "chap_matches_total";
    /// Detections dropped because recognition failed.
    pub const RECOGNITION_SKIPPED_TOTAL: &str = "chap_recognition_skipped_total";
    /// Queue messages by result (`acked`, `pending`, `dead_lettered`).
    pub const MESSAGES_TOTAL: &str = "chap_queue_messages_total";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_video(outcome: &'static str, duration_secs: f64) {
    counter!(names::VIDEOS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::VIDEO_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_matches(count: usize) {
    counter!(names::MATCHES_TOTAL).increment(count as u64);
}

pub fn record_recognition_skipped() {
    counter!(names::RECOGNITION_SKIPPED_TOTAL).increment(1);
}

pub fn record_messages(result: &'static str, count: usize) {
    counter!(names::MESSAGES_TOTAL, "result" => result).increment(count as u64);
}

//! Recognition call metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants.
pub mod names {
    /// Model calls by model and outcome (`ok`, `retry`, `error`).
    pub const CALLS_TOTAL: &str = "recognition_calls_total";

    pub const CALL_DURATION_SECONDS: &str = "recognition_call_duration_seconds";
}

pub fn record_call(model: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        names::CALLS_TOTAL,
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::CALL_DURATION_SECONDS,
        "model" => model.to_string()
    )
    .record(elapsed.as_secs_f64());
}

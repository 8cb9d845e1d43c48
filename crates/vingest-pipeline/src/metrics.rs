//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const SESSIONS_INITIATED_TOTAL: &str = "vingest_sessions_initiated_total";
    pub const CHUNKS_RECORDED_TOTAL: &str = "vingest_chunks_recorded_total";
    pub const CHUNK_FAILURES_TOTAL: &str = "vingest_chunk_failures_total";
    pub const SEGMENTS_PRODUCED_TOTAL: &str = "vingest_segments_produced_total";
    pub const SEGMENTATION_DURATION_SECONDS: &str = "vingest_segmentation_duration_seconds";
    pub const SEGMENTATIONS_ACTIVE: &str = "vingest_segmentations_active";
    pub const ANALYSIS_DURATION_SECONDS: &str = "vingest_analysis_duration_seconds";
    pub const ANALYSIS_FAILURES_TOTAL: &str = "vingest_analysis_failures_total";
    pub const SESSIONS_FAILED_TOTAL: &str = "vingest_sessions_failed_total";
}

pub fn record_session_initiated(strategy: &str) {
    counter!(names::SESSIONS_INITIATED_TOTAL, "strategy" => strategy.to_string()).increment(1);
}

pub fn record_chunk(newly_added: bool) {
    let outcome = if newly_added { "new" } else { "duplicate" };
    counter!(names::CHUNKS_RECORDED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_chunk_failure() {
    counter!(names::CHUNK_FAILURES_TOTAL).increment(1);
}

pub fn record_segmentation(segments: usize, duration_secs: f64) {
    counter!(names::SEGMENTS_PRODUCED_TOTAL).increment(segments as u64);
    histogram!(names::SEGMENTATION_DURATION_SECONDS).record(duration_secs);
}

pub fn set_active_segmentations(count: usize) {
    gauge!(names::SEGMENTATIONS_ACTIVE).set(count as f64);
}

pub fn record_analysis(success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    histogram!(names::ANALYSIS_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
    if !success {
        counter!(names::ANALYSIS_FAILURES_TOTAL).increment(1);
    }
}

pub fn record_session_failed(stage: &str) {
    counter!(names::SESSIONS_FAILED_TOTAL, "stage" => stage.to_string()).increment(1);
}

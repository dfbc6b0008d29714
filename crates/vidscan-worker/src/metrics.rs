//! Job metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vidscan_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vidscan_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vidscan_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vidscan_job_duration_seconds";
    pub const FRAMES_PROCESSED_TOTAL: &str = "vidscan_frames_processed_total";
    pub const ABNORMAL_DETECTIONS_TOTAL: &str = "vidscan_abnormal_detections_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration_secs);
}

pub fn record_job_failed(duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "error").record(duration_secs);
}

pub fn record_frame(abnormal_detections: usize) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
    if abnormal_detections > 0 {
        counter!(names::ABNORMAL_DETECTIONS_TOTAL).increment(abnormal_detections as u64);
    }
}

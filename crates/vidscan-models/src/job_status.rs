//! Status record for a video processing job.
//!
//! The record is replaced as a whole on every update and serialized verbatim
//! for progress polling.

use serde::{Deserialize, Serialize};

use crate::frame::FrameResult;
use crate::utils::round_to;

/// Highest progress a job reports while still processing.
///
/// Only [`JobStatus::Completed`] reports 100.
pub const MAX_PROCESSING_PROGRESS: f64 = 99.99;

/// Progress percentage for `frame_count` frames out of an optional total.
///
/// Returns 0 when the total is unknown or zero.
pub fn processing_progress(frame_count: u64, total_frames: Option<u64>) -> f64 {
    match total_frames {
        Some(total) if total > 0 => {
            let pct = round_to(frame_count as f64 / total as f64 * 100.0, 2);
            pct.min(MAX_PROCESSING_PROGRESS)
        }
        _ => 0.0,
    }
}

/// Job processing status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// No job has run yet
    Idle { progress: f64 },
    /// Frames are being processed
    Processing {
        progress: f64,
        frame_count: u64,
        /// 0 when the container does not report a frame count
        total_frames: u64,
    },
    /// Job finished and the output artifact is available
    Completed {
        progress: f64,
        frame_count: u64,
        total_frames: u64,
        abnormal_count: u64,
        avg_abnormality: f64,
        output_file: String,
        abnormal_frames: Vec<FrameResult>,
    },
    /// Job failed
    Error { error: String },
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::idle()
    }
}

impl JobStatus {
    pub fn idle() -> Self {
        JobStatus::Idle { progress: 0.0 }
    }

    /// Processing record after `frame_count` frames.
    pub fn processing(frame_count: u64, total_frames: Option<u64>) -> Self {
        JobStatus::Processing {
            progress: processing_progress(frame_count, total_frames),
            frame_count,
            total_frames: total_frames.unwrap_or(0),
        }
    }

    /// Completed record; `avg_abnormality` is total abnormal detections per frame, as a percentage.
    pub fn completed(
        frame_count: u64,
        total_frames: Option<u64>,
        abnormal_count: u64,
        output_file: impl Into<String>,
        abnormal_frames: Vec<FrameResult>,
    ) -> Self {
        let avg_abnormality = if frame_count > 0 {
            round_to(abnormal_count as f64 / frame_count as f64 * 100.0, 2)
        } else {
            0.0
        };
        JobStatus::Completed {
            progress: 100.0,
            frame_count,
            total_frames: total_frames.unwrap_or(0),
            abnormal_count,
            avg_abnormality,
            output_file: output_file.into(),
            abnormal_frames,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobStatus::Error {
            error: message.into(),
        }
    }

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle { .. } => "idle",
            JobStatus::Processing { .. } => "processing",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Error { .. } => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Error { .. })
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, JobStatus::Processing { .. })
    }

    /// Progress percentage, `None` for errors.
    pub fn progress(&self) -> Option<f64> {
        match self {
            JobStatus::Idle { progress }
            | JobStatus::Processing { progress, .. }
            | JobStatus::Completed { progress, .. } => Some(*progress),
            JobStatus::Error { .. } => None,
        }
    }

    /// Output artifact path, available only once completed.
    pub fn output_file(&self) -> Option<&str> {
        match self {
            JobStatus::Completed { output_file, .. } => Some(output_file),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_unknown_total() {
        assert_eq!(processing_progress(10, None), 0.0);
        assert_eq!(processing_progress(10, Some(0)), 0.0);
    }

    #[test]
    fn test_progress_capped_below_completion() {
        assert_eq!(processing_progress(5, Some(10)), 50.0);
        assert_eq!(processing_progress(10, Some(10)), MAX_PROCESSING_PROGRESS);
        // Metadata can under-report the frame count.
        assert_eq!(processing_progress(12, Some(10)), MAX_PROCESSING_PROGRESS);
    }

    #[test]
    fn test_progress_monotonic() {
        let mut last = 0.0;
        for frame in 0..=300 {
            let p = processing_progress(frame, Some(250));
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_idle_json() {
        assert_eq!(
            serde_json::to_value(JobStatus::idle()).unwrap(),
            json!({"status": "idle", "progress": 0.0})
        );
    }

    #[test]
    fn test_processing_json() {
        let status = JobStatus::processing(3, None);
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            json!({"status": "processing", "progress": 0.0, "frame_count": 3, "total_frames": 0})
        );
    }

    #[test]
    fn test_completed_average() {
        let status = JobStatus::completed(10, Some(10), 2, "out.avi", Vec::new());
        match &status {
            JobStatus::Completed {
                avg_abnormality,
                progress,
                ..
            } => {
                assert_eq!(*avg_abnormality, 20.0);
                assert_eq!(*progress, 100.0);
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(status.output_file(), Some("out.avi"));
        assert!(status.is_terminal());
    }

    #[test]
    fn test_completed_zero_frames() {
        let status = JobStatus::completed(0, None, 0, "out.avi", Vec::new());
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["avg_abnormality"], 0.0);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["abnormal_frames"], json!([]));
    }

    #[test]
    fn test_error_json() {
        let value = serde_json::to_value(JobStatus::error("boom")).unwrap();
        assert_eq!(value, json!({"status": "error", "error": "boom"}));
        assert_eq!(JobStatus::error("boom").output_file(), None);
    }

    #[test]
    fn test_status_round_trip_through_tag() {
        let parsed: JobStatus =
            serde_json::from_value(json!({"status": "error", "error": "x"})).unwrap();
        assert_eq!(parsed, JobStatus::error("x"));
    }
}

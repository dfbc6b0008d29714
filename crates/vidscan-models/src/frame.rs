//! Per-frame statistics and sampled frame results.

use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::utils::round_to;

/// Percentage of abnormal detections among all detections.
///
/// Returns 0 when there are no detections. The result always lies in [0, 100].
pub fn abnormality_percentage(abnormal: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (abnormal.min(total) as f64 / total as f64) * 100.0
}

/// Detection counts for one frame or image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameStats {
    pub total_detections: usize,
    pub abnormal_detections: usize,
    /// Rounded to 2 decimals
    pub abnormality_percentage: f64,
}

impl FrameStats {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let total = detections.len();
        let abnormal = detections.iter().filter(|d| d.is_abnormal()).count();
        Self {
            total_detections: total,
            abnormal_detections: abnormal,
            abnormality_percentage: round_to(abnormality_percentage(abnormal, total), 2),
        }
    }

    pub fn has_abnormal(&self) -> bool {
        self.abnormal_detections > 0
    }
}

/// Result for one processed video frame, kept when the frame is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// 1-based frame number within the source video
    pub frame_number: u64,
    pub total_detections: usize,
    #[serde(rename = "abnormal_count")]
    pub abnormal_detections: usize,
    pub abnormality_percentage: f64,
    /// Annotated frame as a `data:image/png;base64,...` URI
    #[serde(rename = "image")]
    pub annotated_image: String,
}

impl FrameResult {
    pub fn new(frame_number: u64, stats: FrameStats, annotated_image: impl Into<String>) -> Self {
        Self {
            frame_number,
            total_detections: stats.total_detections,
            abnormal_detections: stats.abnormal_detections,
            abnormality_percentage: stats.abnormality_percentage,
            annotated_image: annotated_image.into(),
        }
    }
}

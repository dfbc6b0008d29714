//! Shared data models for the VidScan detection service.
//!
//! This crate provides Serde-serializable types for:
//! - Per-frame detections and their normal/abnormal classification
//! - Frame statistics and sampled frame results
//! - Video job identifiers and the job status record exposed to pollers

pub mod detection;
pub mod frame;
pub mod job;
pub mod job_status;
pub mod utils;

// Re-export common types
pub use detection::{BoundingBox, Detection, DetectionClass, ABNORMAL_CLASS_ID};
pub use frame::{abnormality_percentage, FrameResult, FrameStats};
pub use job::JobId;
pub use job_status::{processing_progress, JobStatus, MAX_PROCESSING_PROGRESS};
pub use utils::{round_to, secure_filename};

//! Background video processing.
//!
//! This crate provides:
//! - The video job: sequential detect, annotate and encode of every frame
//! - A bounded sampler of abnormal frames
//! - Per-job status stores and a registry with a single active slot
//! - Structured job logging and job metrics

pub mod error;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod sampler;
pub mod state;
pub mod video_job;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use registry::{JobRegistry, JobTicket, DEFAULT_HISTORY_LIMIT};
pub use sampler::{AbnormalFrameSampler, SAMPLE_CAPACITY};
pub use state::JobStateStore;
pub use video_job::{VideoJob, VideoJobRequest};

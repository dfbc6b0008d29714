//! Worker error types.

use thiserror::Error;
use vidscan_models::JobId;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("A video job is already running: {0}")]
    Busy(JobId),

    #[error("Could not open video: {0}")]
    SourceOpen(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] vidscan_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn source_open(msg: impl Into<String>) -> Self {
        Self::SourceOpen(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Rejected because another job holds the active slot.
    pub fn is_busy(&self) -> bool {
        matches!(self, WorkerError::Busy(_))
    }
}

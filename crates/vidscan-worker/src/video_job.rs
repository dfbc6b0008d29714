//! The video processing job.
//!
//! Frames are read, detected, annotated and written strictly in source
//! order. Status is published after every frame; the terminal status is
//! Completed or Error and is never followed by another update.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::Instrument;

use vidscan_media::{png_data_uri, Detector, FrameAnnotator, RgbImage, VideoBackend};
use vidscan_models::{FrameResult, FrameStats, JobId, JobStatus};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobTicket;
use crate::sampler::AbnormalFrameSampler;
use crate::state::JobStateStore;

/// Frames between info-level progress lines.
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Input and output of one job.
#[derive(Debug, Clone)]
pub struct VideoJobRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Remove the input once the job completes
    pub delete_input: bool,
}

impl VideoJobRequest {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            delete_input: false,
        }
    }

    pub fn deleting_input(mut self) -> Self {
        self.delete_input = true;
        self
    }
}

/// Result of one frame's detect + annotate step.
struct ProcessedFrame {
    annotated: RgbImage,
    stats: FrameStats,
    /// PNG data URI, only encoded when the sampler wants the frame
    sample_image: Option<String>,
}

/// Runs video jobs against a detector, an annotator and a video backend.
#[derive(Clone)]
pub struct VideoJob {
    detector: Arc<dyn Detector>,
    annotator: Arc<FrameAnnotator>,
    backend: Arc<dyn VideoBackend>,
}

impl VideoJob {
    pub fn new(
        detector: Arc<dyn Detector>,
        annotator: Arc<FrameAnnotator>,
        backend: Arc<dyn VideoBackend>,
    ) -> Self {
        Self {
            detector,
            annotator,
            backend,
        }
    }

    /// Run the job in the background.
    ///
    /// The ticket is held until the job reaches a terminal status, so the
    /// active slot frees up even if the task fails.
    pub fn spawn(&self, ticket: JobTicket, request: VideoJobRequest) -> JoinHandle<JobStatus> {
        let job = self.clone();
        let span = JobLogger::new(ticket.job_id(), "video_processing").create_span();

        tokio::spawn(
            async move {
                let status = job.run(ticket.job_id(), ticket.store(), &request).await;
                drop(ticket);
                status
            }
            .instrument(span),
        )
    }

    /// Run the job to completion, publishing every status change to `store`.
    ///
    /// Returns the terminal status.
    pub async fn run(
        &self,
        job_id: &JobId,
        store: &JobStateStore,
        request: &VideoJobRequest,
    ) -> JobStatus {
        let logger = JobLogger::new(job_id, "video_processing");
        logger.log_start(&format!(
            "{} -> {} (detector: {})",
            request.input_path.display(),
            request.output_path.display(),
            self.detector.name()
        ));
        metrics::record_job_started();
        let started = Instant::now();

        let status = match self.process(store, &logger, request).await {
            Ok(status) => {
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                status
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                metrics::record_job_failed(started.elapsed().as_secs_f64());
                JobStatus::error(e.to_string())
            }
        };
        store.set(status.clone());

        if let JobStatus::Completed {
            frame_count,
            abnormal_count,
            avg_abnormality,
            ..
        } = &status
        {
            logger.log_completion(&format!(
                "{} frames, {} abnormal detections, avg abnormality {:.2}%",
                frame_count, abnormal_count, avg_abnormality
            ));
            if request.delete_input {
                remove_input(&logger, &request.input_path).await;
            }
        }

        status
    }

    async fn process(
        &self,
        store: &JobStateStore,
        logger: &JobLogger,
        request: &VideoJobRequest,
    ) -> WorkerResult<JobStatus> {
        let mut sampler = AbnormalFrameSampler::new();
        store.set(JobStatus::processing(0, None));

        let mut source = self
            .backend
            .open_source(&request.input_path)
            .await
            .map_err(|e| WorkerError::source_open(e.to_string()))?;
        let info = source.info();
        let total_frames = info.total_frames.filter(|t| *t > 0);
        store.set(JobStatus::processing(0, total_frames));

        logger.log_progress(&format!(
            "{}x{} @ {:.2} fps, {} frames",
            info.width,
            info.height,
            info.fps,
            total_frames.map_or_else(|| "unknown".to_string(), |t| t.to_string())
        ));

        let mut sink = self.backend.open_sink(&request.output_path, info).await?;

        let mut frame_count: u64 = 0;
        let mut abnormal_count: u64 = 0;

        while let Some(frame) = source.next_frame().await? {
            frame_count += 1;

            let processed = self
                .process_frame(frame, frame_count, total_frames, !sampler.is_full())
                .await?;
            sink.write_frame(&processed.annotated).await?;

            let abnormal = processed.stats.abnormal_detections;
            abnormal_count += abnormal as u64;
            if let Some(image) = processed.sample_image {
                sampler.consider(FrameResult::new(frame_count, processed.stats, image));
            }

            store.set(JobStatus::processing(frame_count, total_frames));
            metrics::record_frame(abnormal);
            logger.log_frame(frame_count, total_frames, abnormal);
            if frame_count % PROGRESS_LOG_INTERVAL == 0 {
                logger.log_progress(&format!(
                    "{} frames, {} abnormal detections so far",
                    frame_count, abnormal_count
                ));
            }
        }

        source.close().await?;
        sink.finish().await?;

        Ok(JobStatus::completed(
            frame_count,
            total_frames,
            abnormal_count,
            request.output_path.to_string_lossy(),
            sampler.into_frames(),
        ))
    }

    /// Detect and annotate one frame on the blocking pool.
    async fn process_frame(
        &self,
        frame: RgbImage,
        frame_number: u64,
        total_frames: Option<u64>,
        want_sample: bool,
    ) -> WorkerResult<ProcessedFrame> {
        let detector = Arc::clone(&self.detector);
        let annotator = Arc::clone(&self.annotator);

        let processed = tokio::task::spawn_blocking(move || -> WorkerResult<ProcessedFrame> {
            let detections = detector.detect(&frame)?;
            let stats = FrameStats::from_detections(&detections);
            let annotated = annotator.annotate_frame(&frame, &detections, frame_number, total_frames);
            let sample_image = if want_sample && stats.has_abnormal() {
                Some(png_data_uri(&annotated)?)
            } else {
                None
            };
            Ok(ProcessedFrame {
                annotated,
                stats,
                sample_image,
            })
        })
        .await
        .map_err(|e| WorkerError::processing_failed(format!("frame {} task failed: {}", frame_number, e)))??;

        Ok(processed)
    }
}

/// Best-effort removal; failure is logged and swallowed.
async fn remove_input(logger: &JobLogger, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => logger.log_progress(&format!("Removed input {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => logger.log_warning(&format!("Failed to remove input {}: {}", path.display(), e)),
    }
}

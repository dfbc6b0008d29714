//! Application state.

use std::sync::Arc;

use tracing::{info, warn};

use vidscan_media::{
    Detector, FfmpegBackend, FrameAnnotator, OnnxDetector, UnavailableDetector, VideoBackend,
};
use vidscan_worker::{JobRegistry, VideoJob};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub detector: Arc<dyn Detector>,
    pub annotator: Arc<FrameAnnotator>,
    pub jobs: Arc<JobRegistry>,
    pub video_job: VideoJob,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// A missing model degrades the service instead of failing startup:
    /// every detection then fails. A configured font that can't be loaded
    /// falls back to the bundled one.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.upload_dir).await?;

        let detector: Arc<dyn Detector> = match OnnxDetector::new(config.detector_config()) {
            Ok(detector) => Arc::new(detector),
            Err(e) => {
                warn!(model_path = %config.model_path, error = %e, "Detector unavailable");
                Arc::new(UnavailableDetector::new(e.to_string()))
            }
        };

        let annotator = overlay_annotator(&config);

        if let Err(e) = FfmpegBackend::check_available() {
            warn!(error = %e, "Video processing will fail until FFmpeg is installed");
        }

        info!(
            detector = detector.name(),
            upload_dir = %config.upload_dir.display(),
            "Application state ready"
        );

        Ok(Self::with_components(
            config,
            detector,
            Arc::new(annotator),
            Arc::new(FfmpegBackend::new()),
        ))
    }

    /// Assemble state from explicit components.
    pub fn with_components(
        config: ApiConfig,
        detector: Arc<dyn Detector>,
        annotator: Arc<FrameAnnotator>,
        backend: Arc<dyn VideoBackend>,
    ) -> Self {
        let jobs = Arc::new(JobRegistry::new(config.job_history_limit));
        let video_job = VideoJob::new(Arc::clone(&detector), Arc::clone(&annotator), backend);
        Self {
            config,
            detector,
            annotator,
            jobs,
            video_job,
        }
    }
}

/// Annotator using the configured font, or the bundled one.
fn overlay_annotator(config: &ApiConfig) -> FrameAnnotator {
    let Some(path) = &config.font_path else {
        return FrameAnnotator::default();
    };
    match FrameAnnotator::from_font_file(path) {
        Ok(annotator) => annotator,
        Err(e) => {
            warn!(font = %path.display(), error = %e, "Using bundled overlay font");
            FrameAnnotator::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_font_falls_back_to_bundled() {
        let config = ApiConfig {
            font_path: Some("/nonexistent/font.ttf".into()),
            ..ApiConfig::default()
        };
        assert!(overlay_annotator(&config).has_font());
        assert!(overlay_annotator(&ApiConfig::default()).has_font());
    }
}

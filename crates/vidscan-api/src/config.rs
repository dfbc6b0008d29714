//! API configuration.

use std::path::PathBuf;
use std::str::FromStr;

use vidscan_media::DetectorConfig;
use vidscan_worker::DEFAULT_HISTORY_LIMIT;

/// Default upload limit, matching the largest accepted video.
pub const DEFAULT_MAX_BODY_SIZE: usize = 500 * 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Directory for uploaded inputs and rendered outputs
    pub upload_dir: PathBuf,
    /// Server-side video used by the sample endpoint
    pub sample_video_path: PathBuf,
    /// ONNX model file
    pub model_path: String,
    /// Square model input size in pixels
    pub model_input_size: u32,
    /// Minimum detection confidence
    pub confidence_threshold: f32,
    /// Overlay font overriding the bundled DejaVu Sans
    pub font_path: Option<PathBuf>,
    /// Finished jobs kept for status queries
    pub job_history_limit: usize,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            environment: "development".to_string(),
            upload_dir: PathBuf::from("uploads"),
            sample_video_path: PathBuf::from("vid.mp4"),
            model_path: "models/yolov8n.onnx".to_string(),
            model_input_size: 640,
            confidence_threshold: 0.25,
            font_path: None,
            job_history_limit: DEFAULT_HISTORY_LIMIT,
            metrics_enabled: true,
        }
    }
}

/// Whether an `ENVIRONMENT` value names production, ignoring case.
pub fn is_production_env(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("production")
}

/// Parse an environment variable, falling back on absence or parse failure.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            sample_video_path: std::env::var("SAMPLE_VIDEO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sample_video_path),
            model_path: std::env::var("MODEL_PATH").unwrap_or(defaults.model_path),
            model_input_size: env_or("MODEL_INPUT_SIZE", defaults.model_input_size),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            font_path: std::env::var("FONT_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.font_path),
            job_history_limit: env_or("JOB_HISTORY_LIMIT", defaults.job_history_limit),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        is_production_env(&self.environment)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.model_path.clone(),
            confidence_threshold: self.confidence_threshold,
            input_size: self.model_input_size,
            ..DetectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_body_size, 500 * 1024 * 1024);
        assert!(!config.is_production());

        let detector = config.detector_config();
        assert_eq!(detector.input_size, 640);
        assert_eq!(detector.confidence_threshold, 0.25);
    }

    #[test]
    fn test_production_ignores_case() {
        assert!(is_production_env("production"));
        assert!(is_production_env("Production"));
        assert!(is_production_env(" PRODUCTION\n"));
        assert!(!is_production_env("staging"));

        let config = ApiConfig {
            environment: "Production".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.is_production());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("VIDSCAN_TEST_PORT", "not-a-port");
        assert_eq!(env_or("VIDSCAN_TEST_PORT", 5000u16), 5000);
        std::env::set_var("VIDSCAN_TEST_PORT", " 8080 ");
        assert_eq!(env_or("VIDSCAN_TEST_PORT", 5000u16), 8080);
        std::env::remove_var("VIDSCAN_TEST_PORT");
    }
}

#![deny(unreachable_patterns)]
//! Media side of the abnormality detection service.
//!
//! This crate provides:
//! - The detector seam and its ONNX Runtime implementation
//! - Frame annotation (boxes, labels, summary overlays)
//! - PNG / `data:` URI encoding for JSON transport
//! - FFprobe metadata and FFmpeg rawvideo frame I/O

pub mod annotate;
pub mod codec;
pub mod detector;
pub mod error;
pub mod probe;
pub mod video_io;

pub use annotate::{bundled_font, detection_label, summary_lines, FrameAnnotator, OverlayLine};
pub use codec::{decode_data_uri, decode_image, encode_png, png_data_uri, PNG_DATA_URI_PREFIX};
pub use detector::{decode_yolo_output, Detector, DetectorConfig, OnnxDetector, UnavailableDetector};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo, DEFAULT_FPS};
pub use video_io::{FfmpegBackend, FrameSink, FrameSource, StreamInfo, VideoBackend};

// Re-export the frame type so downstream crates don't need a direct `image` dependency.
pub use image::{Rgb, RgbImage};

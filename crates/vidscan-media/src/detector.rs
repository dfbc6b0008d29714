//! Abnormality detection using a YOLOv8 ONNX model.
//!
//! The model is opaque to the rest of the service: callers hand it an RGB
//! frame and get back pixel-space detections. Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when `cuda` feature enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::Mutex;

use image::{imageops::FilterType, RgbImage};
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use vidscan_models::{BoundingBox, Detection};

use crate::error::{MediaError, MediaResult};

/// Frame-to-detections adapter around the external model.
///
/// Implementations must not mutate the frame and must be callable from
/// several threads; inference is run on blocking threads.
pub trait Detector: Send + Sync {
    /// Detect regions in a frame.
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Configuration for the ONNX detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Detector backed by ONNX Runtime.
pub struct OnnxDetector {
    session: Mutex<Session>,
    config: DetectorConfig,
}

impl OnnxDetector {
    /// Load the model described by `config`.
    ///
    /// Returns error if model file doesn't exist or cannot be loaded.
    pub fn new(config: DetectorConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            confidence_threshold = config.confidence_threshold,
            "Detector initialized"
        );

        Ok(Self { session, config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Resize to the square model input, scale to [0, 1], lay out as NCHW.
    fn preprocess(&self, frame: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(frame, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    /// Run inference, returning the flat output and its `(features, boxes)` dims.
    fn run_inference(&self, input: Value) -> MediaResult<(Vec<f32>, usize, usize)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // YOLOv8 output is [1, 4 + classes, candidates]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 3 || dims[0] != 1 {
            return Err(MediaError::detection_failed(format!(
                "Unexpected output shape {:?}",
                dims
            )));
        }

        Ok((data.to_vec(), dims[1] as usize, dims[2] as usize))
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        let (width, height) = frame.dimensions();
        let input = self.preprocess(frame)?;
        let (outputs, num_features, num_boxes) = self.run_inference(input)?;

        let detections = decode_yolo_output(
            &outputs,
            num_features,
            num_boxes,
            (width, height),
            &self.config,
        )?;

        debug!(count = detections.len(), "Detection completed");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "onnx-yolov8"
    }
}

/// Stand-in used when the model could not be loaded at startup.
///
/// Every call fails, so jobs end in the error state instead of the service
/// refusing to start.
#[derive(Debug, Clone)]
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Detector for UnavailableDetector {
    fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        Err(MediaError::model_not_found(self.reason.clone()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Candidate box in pixel space before NMS.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: u32,
    confidence: f32,
}

/// Decode a YOLOv8 `[1, 4 + classes, candidates]` output into detections.
///
/// Boxes come out of the model as `(cx, cy, w, h)` in input-size space and are
/// scaled back to the original frame, clamped, then filtered with per-class NMS.
pub fn decode_yolo_output(
    outputs: &[f32],
    num_features: usize,
    num_boxes: usize,
    (orig_width, orig_height): (u32, u32),
    config: &DetectorConfig,
) -> MediaResult<Vec<Detection>> {
    if num_features <= 4 {
        return Err(MediaError::detection_failed(format!(
            "Output has no class scores ({} features)",
            num_features
        )));
    }
    if outputs.len() != num_features * num_boxes {
        return Err(MediaError::detection_failed(format!(
            "Unexpected output size: expected {}, got {}",
            num_features * num_boxes,
            outputs.len()
        )));
    }

    let num_classes = num_features - 4;
    let output = ArrayView2::from_shape((num_features, num_boxes), outputs)
        .map_err(|e| MediaError::internal(format!("Failed to reshape output: {}", e)))?;
    let rows = output.t(); // [candidates, features]

    let input_size = config.input_size as f32;
    let scale_w = orig_width as f32 / input_size;
    let scale_h = orig_height as f32 / input_size;
    let max_x = orig_width.saturating_sub(1) as f32;
    let max_y = orig_height.saturating_sub(1) as f32;

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = rows[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (rows[[i, 0]], rows[[i, 1]], rows[[i, 2]], rows[[i, 3]]);
        candidates.push(Candidate {
            x1: ((cx - w / 2.0) * scale_w).clamp(0.0, max_x),
            y1: ((cy - h / 2.0) * scale_h).clamp(0.0, max_y),
            x2: ((cx + w / 2.0) * scale_w).clamp(0.0, max_x),
            y2: ((cy + h / 2.0) * scale_h).clamp(0.0, max_y),
            class_id: best_class as u32,
            confidence: best_score,
        });
    }

    Ok(non_maximum_suppression(candidates, config.nms_threshold)
        .into_iter()
        .map(|c| {
            Detection::new(
                c.class_id,
                c.confidence,
                BoundingBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32),
            )
        })
        .collect())
}

/// Remove overlapping same-class candidates, keeping the most confident.
fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && compute_iou(kept, &candidate) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection over Union of two pixel boxes.
fn compute_iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

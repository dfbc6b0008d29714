//! Synchronous detection handlers: still images and camera frames.
//!
//! Neither touches the job registry.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vidscan_media::{decode_data_uri, decode_image, png_data_uri, MediaResult};
use vidscan_models::{round_to, BoundingBox, Detection, FrameStats};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::{validated_filename, FILE_FIELD, IMAGE_EXTENSIONS};

/// One detection as reported to clients.
#[derive(Debug, Serialize)]
pub struct DetectionView {
    pub index: usize,
    #[serde(rename = "class")]
    pub class_name: &'static str,
    pub class_id: u32,
    /// Rounded to 3 decimals
    pub confidence: f64,
    pub bbox: BoundingBox,
}

impl DetectionView {
    fn new(index: usize, detection: &Detection) -> Self {
        Self {
            index,
            class_name: detection.class_name.as_str(),
            class_id: detection.class_id,
            confidence: round_to(detection.confidence as f64, 3),
            bbox: detection.bbox,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageDetectionResponse {
    pub success: bool,
    /// Annotated image as a PNG data URI
    pub image: String,
    pub total_detections: usize,
    pub abnormal_detections: usize,
    pub abnormality_percentage: f64,
    pub detections: Vec<DetectionView>,
}

#[derive(Debug, Deserialize)]
pub struct CameraFrameRequest {
    /// Frame as a base64 data URI
    pub frame: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CameraFrameResponse {
    pub success: bool,
    /// Highlighted frame as a PNG data URI
    pub frame: String,
    pub total_detections: usize,
    pub abnormal_detections: usize,
    pub abnormality_percentage: f64,
}

/// POST /api/detect-image
pub async fn detect_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ImageDetectionResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = validated_filename(&field, IMAGE_EXTENSIONS)?;
        let bytes = field.bytes().await?;

        let detector = state.detector.clone();
        let annotator = state.annotator.clone();
        let response = tokio::task::spawn_blocking(move || -> MediaResult<ImageDetectionResponse> {
            let image = decode_image(&bytes)?;
            let detections = detector.detect(&image)?;
            let annotated = annotator.annotate_image(&image, &detections);
            let stats = FrameStats::from_detections(&detections);

            Ok(ImageDetectionResponse {
                success: true,
                image: png_data_uri(&annotated)?,
                total_detections: stats.total_detections,
                abnormal_detections: stats.abnormal_detections,
                abnormality_percentage: stats.abnormality_percentage,
                detections: detections
                    .iter()
                    .enumerate()
                    .map(|(i, d)| DetectionView::new(i, d))
                    .collect(),
            })
        })
        .await
        .map_err(|e| ApiError::internal(format!("Detection task failed: {}", e)))??;

        info!(
            filename = %filename,
            total = response.total_detections,
            abnormal = response.abnormal_detections,
            "Image processed"
        );
        return Ok(Json(response));
    }

    Err(ApiError::validation("No file provided"))
}

/// POST /api/process-camera-frame
pub async fn process_camera_frame(
    State(state): State<AppState>,
    payload: Result<Json<CameraFrameRequest>, JsonRejection>,
) -> ApiResult<Json<CameraFrameResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let frame = request
        .frame
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::validation("No frame provided"))?;

    let detector = state.detector.clone();
    let annotator = state.annotator.clone();
    let response = tokio::task::spawn_blocking(move || -> MediaResult<CameraFrameResponse> {
        let image = decode_image(&decode_data_uri(&frame)?)?;
        let detections = detector.detect(&image)?;
        let highlighted = annotator.highlight_abnormal(&image, &detections);
        let stats = FrameStats::from_detections(&detections);

        Ok(CameraFrameResponse {
            success: true,
            frame: png_data_uri(&highlighted)?,
            total_detections: stats.total_detections,
            abnormal_detections: stats.abnormal_detections,
            abnormality_percentage: stats.abnormality_percentage,
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Detection task failed: {}", e)))??;

    Ok(Json(response))
}

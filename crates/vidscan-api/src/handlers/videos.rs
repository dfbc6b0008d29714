//! Video job handlers: submission, progress polling and artifact download.

use std::path::PathBuf;

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use vidscan_models::{JobId, JobStatus};
use vidscan_worker::VideoJobRequest;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upload::{save_field, session_timestamp, stored_filename, validated_filename, FILE_FIELD, VIDEO_EXTENSIONS};

/// Filename suggested for every downloaded artifact.
pub const DOWNLOAD_FILENAME: &str = "output_video.avi";

/// Acknowledgement for an accepted video job.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    /// Submission timestamp, also embedded in the file names
    pub session_id: String,
    pub job_id: JobId,
}

/// POST /api/process-video
pub async fn process_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = validated_filename(&field, VIDEO_EXTENSIONS)?;

        // Claim the slot before writing anything to disk.
        let ticket = state.jobs.try_begin()?;

        let session_id = session_timestamp();
        let job_id = ticket.job_id().clone();
        let upload_dir = &state.config.upload_dir;
        let input_path = upload_dir.join(format!(
            "input_{}_{}_{}",
            session_id,
            job_id,
            stored_filename(&filename)
        ));
        let output_path = upload_dir.join(format!("output_{}_{}.avi", session_id, job_id));

        if let Err(e) = save_field(field, &input_path).await {
            warn!(path = %input_path.display(), error = %e, "Upload failed");
            ticket.discard();
            let _ = tokio::fs::remove_file(&input_path).await;
            return Err(e);
        }

        info!(job_id = %job_id, input = %input_path.display(), "Video job submitted");
        state.video_job.spawn(
            ticket,
            VideoJobRequest::new(input_path, output_path).deleting_input(),
        );

        return Ok(Json(SubmitResponse {
            success: true,
            message: "Video processing started".to_string(),
            session_id,
            job_id,
        }));
    }

    Err(ApiError::validation("No file provided"))
}

/// POST /api/process-sample-video
pub async fn process_sample_video(State(state): State<AppState>) -> ApiResult<Json<SubmitResponse>> {
    let sample = state.config.sample_video_path.clone();
    if tokio::fs::metadata(&sample).await.is_err() {
        return Err(ApiError::not_found("Sample video not found"));
    }

    let ticket = state.jobs.try_begin()?;
    let session_id = session_timestamp();
    let job_id = ticket.job_id().clone();
    let output_path = state
        .config
        .upload_dir
        .join(format!("output_sample_{}_{}.avi", session_id, job_id));

    info!(job_id = %job_id, input = %sample.display(), "Sample video job submitted");
    // The sample is shared by every run and is never deleted.
    state
        .video_job
        .spawn(ticket, VideoJobRequest::new(sample, output_path));

    Ok(Json(SubmitResponse {
        success: true,
        message: "Sample video processing started".to_string(),
        session_id,
        job_id,
    }))
}

/// GET /api/video-progress
pub async fn video_progress(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.jobs.latest_status())
}

/// GET /api/download-video
pub async fn download_video(State(state): State<AppState>) -> ApiResult<Response> {
    artifact_response(&state.jobs.latest_status()).await
}

/// GET /api/jobs/:job_id/progress
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    let status = state
        .jobs
        .status(&JobId::from_string(job_id))
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(status))
}

/// GET /api/jobs/:job_id/download
pub async fn job_download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let status = state
        .jobs
        .status(&JobId::from_string(job_id))
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    artifact_response(&status).await
}

/// Artifact of a completed job as an attachment.
async fn artifact_response(status: &JobStatus) -> ApiResult<Response> {
    let output = status
        .output_file()
        .map(PathBuf::from)
        .ok_or_else(|| ApiError::not_ready("No completed video available"))?;

    let bytes = match tokio::fs::read(&output).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "video/x-msvideo".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", DOWNLOAD_FILENAME),
            ),
        ],
        bytes,
    )
        .into_response())
}

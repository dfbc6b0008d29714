//! Multipart upload validation and persistence.

use std::path::Path;

use axum::extract::multipart::Field;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use vidscan_models::secure_filename;

use crate::error::{ApiError, ApiResult};

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Whether `filename` has one of the `allowed` extensions (case-insensitive).
pub fn allowed_file(filename: &str, allowed: &[&str]) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Client filename of an upload field, checked against `allowed`.
pub fn validated_filename(field: &Field<'_>, allowed: &[&str]) -> ApiResult<String> {
    let filename = field.file_name().unwrap_or_default().trim();
    if filename.is_empty() {
        return Err(ApiError::validation("No file selected"));
    }
    if !allowed_file(filename, allowed) {
        return Err(ApiError::validation("Invalid file type"));
    }
    Ok(filename.to_string())
}

/// Local-time stamp used in upload names and returned as the session id.
pub fn session_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitized name for storing an upload on disk.
pub fn stored_filename(filename: &str) -> String {
    let name = secure_filename(filename);
    if name.is_empty() {
        "upload".to_string()
    } else {
        name
    }
}

/// Stream a field to `path` chunk by chunk; returns the bytes written.
pub async fn save_field(mut field: Field<'_>, path: &Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(path = %path.display(), bytes = written, "Saved upload");
    Ok(written)
}

//! Image encoding and `data:` URI transport.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};

use crate::error::{MediaError, MediaResult};

/// Prefix for PNG images sent inline in JSON.
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Encode an RGB image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> MediaResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Encode an RGB image as a `data:image/png;base64,...` URI.
pub fn png_data_uri(image: &RgbImage) -> MediaResult<String> {
    let bytes = encode_png(image)?;
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(bytes)))
}

/// Decode the payload of a base64 `data:` URI.
///
/// A bare base64 string without the `data:...,` header is accepted too.
pub fn decode_data_uri(uri: &str) -> MediaResult<Vec<u8>> {
    let payload = match uri.split_once(',') {
        Some((header, payload)) => {
            if !header.ends_with(";base64") {
                return Err(MediaError::invalid_data_uri("payload is not base64 encoded"));
            }
            payload
        }
        None => uri,
    };

    let payload = payload.trim();
    if payload.is_empty() {
        return Err(MediaError::invalid_data_uri("empty payload"));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| MediaError::invalid_data_uri(e.to_string()))
}

/// Decode any supported image format into RGB.
pub fn decode_image(bytes: &[u8]) -> MediaResult<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

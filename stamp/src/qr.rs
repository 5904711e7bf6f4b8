//! QR rendering for stamps and sealed payloads.
//!
//! Output is a grayscale PNG. Rendering is deterministic: the same payload
//! always produces the same bytes, so a stamp's QR can be regenerated and
//! compared.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use thiserror::Error;

use crate::config::QR_MIN_DIMENSION;

/// The encoder could not produce an image. Callers treat this as a
/// transient backend failure.
#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR encoder unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Render `payload` as a PNG QR code.
pub fn generate_qr_png(payload: &str) -> Result<Vec<u8>, QrError> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| QrError::ServiceUnavailable(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| QrError::ServiceUnavailable(e.to_string()))?;

    tracing::debug!(payload_len = payload.len(), png_len = png.len(), "rendered QR code");
    Ok(png)
}

/// [`generate_qr_png`], base64-encoded for embedding in JSON.
pub fn generate_qr_base64(payload: &str) -> Result<String, QrError> {
    Ok(BASE64.encode(generate_qr_png(payload)?))
}

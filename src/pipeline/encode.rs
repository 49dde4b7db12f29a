//! Image encoding: PNG for the preview, baseline JPEG for PDF pages.
//!
//! JPEG is used inside the output PDF because PDF readers decode it natively
//! (`/DCTDecode`), so the bytes go in untouched and file size follows the
//! profile's JPEG quality. The preview is PNG so the first page the user sees
//! is lossless.

use crate::error::ServiceError;
use crate::quality::{PngCompression, QualityProfile};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use tracing::debug;

/// Encode the preview image.
pub fn encode_png(img: &RgbImage, profile: &QualityProfile) -> Result<Vec<u8>, ServiceError> {
    let compression = match profile.png_compression {
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    };
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, compression, FilterType::Adaptive)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ServiceError::Internal(format!("PNG encoding failed: {e}")))?;
    debug!("Encoded preview → {} bytes PNG", buf.len());
    Ok(buf)
}

/// Encode one page for embedding in the output PDF.
pub fn encode_jpeg(img: &RgbImage, profile: &QualityProfile) -> Result<Vec<u8>, ServiceError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, profile.jpeg_quality)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| ServiceError::Internal(format!("JPEG encoding failed: {e}")))?;
    Ok(buf)
}

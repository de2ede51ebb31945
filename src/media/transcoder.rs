//! PNG to JPEG conversion driven by the caller's `Accept` header.
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;

use crate::backend::AssetResult;
use crate::media::accept::AcceptHeader;

pub const PNG: &str = "image/png";
pub const JPEG: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to decode PNG: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    Encode(image::ImageError),
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseTranscoder {
    quality: u8,
}

impl Default for ResponseTranscoder {
    fn default() -> Self {
        Self::new(90)
    }
}

impl ResponseTranscoder {
    /// `quality` is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        ResponseTranscoder {
            quality: quality.clamp(1, 100),
        }
    }

    /// Convert a PNG asset to JPEG when the caller admits JPEG but did not
    /// ask for the asset's own type. Any other asset is returned unchanged,
    /// and so is the original when conversion fails.
    pub fn transcode(&self, asset: AssetResult, accept: &AcceptHeader) -> AssetResult {
        if accept.is_empty() || accept.lists(&asset.content_type) {
            return asset;
        }
        if !is_png(&asset.content_type) || !accept.admits(JPEG) {
            return asset;
        }

        match self.png_to_jpeg(&asset.bytes) {
            Ok(jpeg) => {
                tracing::debug!(
                    png_bytes = asset.bytes.len(),
                    jpeg_bytes = jpeg.len(),
                    quality = self.quality,
                    "Transcoded PNG to JPEG"
                );
                AssetResult::new(jpeg, JPEG).with_status(asset.status)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transcoding failed, returning original asset");
                asset
            }
        }
    }

    /// Decode PNG bytes, drop alpha and encode as JPEG.
    pub fn png_to_jpeg(&self, png: &[u8]) -> Result<Vec<u8>, TranscodeError> {
        let decoded =
            image::load_from_memory_with_format(png, ImageFormat::Png).map_err(TranscodeError::Decode)?;
        let rgb = decoded.to_rgb8();

        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(TranscodeError::Encode)?;
        Ok(out.into_inner())
    }
}

fn is_png(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PNG))
}

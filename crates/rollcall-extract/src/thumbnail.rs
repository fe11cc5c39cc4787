//! Grayscale thumbnail embedding.
//!
//! Not a face model: it downsamples the whole frame, which only separates
//! subjects under controlled framing. It exists so enrollment and matching
//! work end to end without the neural extractor.

use crate::frame::{is_dark_frame, is_flat_frame};
use image::imageops::FilterType;
use image::DynamicImage;
use rollcall_core::{Embedding, ExtractError, FaceExtractor};
use std::path::Path;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 64;
/// Largest accepted side length; larger values are clamped.
pub const MAX_THUMBNAIL_SIZE: u32 = 1024;
const DARK_FRAME_PCT: f32 = 0.95;
/// Minimum luma standard deviation (0–255 scale) for a usable frame.
const MIN_STDDEV: f32 = 2.0;

/// `size × size` luma thumbnail, scaled to [0, 1] and mean-centered.
pub struct ThumbnailExtractor {
    size: u32,
}

impl Default for ThumbnailExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_THUMBNAIL_SIZE)
    }
}

impl ThumbnailExtractor {
    pub fn new(size: u32) -> Self {
        Self {
            size: size.clamp(1, MAX_THUMBNAIL_SIZE),
        }
    }

    /// Embedding dimensionality this extractor produces.
    pub fn dim(&self) -> usize {
        let side = self.size as usize;
        side * side
    }

    pub fn embed(&self, image: &DynamicImage) -> Result<Embedding, ExtractError> {
        let gray = image.to_luma8();
        if is_dark_frame(gray.as_raw(), DARK_FRAME_PCT) {
            tracing::debug!(width = gray.width(), height = gray.height(), "dark frame");
            return Err(ExtractError::NoFaceDetected);
        }

        let thumb = image::imageops::resize(&gray, self.size, self.size, FilterType::Triangle);
        if is_flat_frame(thumb.as_raw(), MIN_STDDEV) {
            tracing::debug!("flat frame");
            return Err(ExtractError::NoFaceDetected);
        }

        let scaled: Vec<f32> = thumb.as_raw().iter().map(|&p| f32::from(p) / 255.0).collect();
        let mean = scaled.iter().sum::<f32>() / scaled.len() as f32;
        Ok(Embedding::new(scaled.into_iter().map(|v| v - mean).collect()))
    }
}

impl FaceExtractor<DynamicImage> for ThumbnailExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Embedding, ExtractError> {
        self.embed(image)
    }
}

/// Encoded image bytes (JPEG, PNG, ...) as uploaded by a client.
impl FaceExtractor<[u8]> for ThumbnailExtractor {
    fn extract(&mut self, bytes: &[u8]) -> Result<Embedding, ExtractError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ExtractError::Unreadable(e.to_string()))?;
        self.embed(&image)
    }
}

impl FaceExtractor<Path> for ThumbnailExtractor {
    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        let image = image::open(path)
            .map_err(|e| ExtractError::Unreadable(format!("{}: {e}", path.display())))?;
        self.embed(&image)
    }
}

//! Sepia tone transform.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use tokio_util::sync::CancellationToken;

use crate::error::StageError;

use super::ImageTransform;

/// Production [`ImageTransform`]: blends each pixel toward its sepia tone.
///
/// Output is always PNG regardless of the input format.
#[derive(Clone, Copy, Debug)]
pub struct SepiaTransform {
    intensity: f32,
}

impl SepiaTransform {
    /// Create a transform with the given blend factor (clamped to 0.0..=1.0)
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity: intensity.clamp(0.0, 1.0),
        }
    }

    /// Effective blend factor
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    fn tone(&self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
        let sepia = [
            0.393 * r + 0.769 * g + 0.189 * b,
            0.349 * r + 0.686 * g + 0.168 * b,
            0.272 * r + 0.534 * g + 0.131 * b,
        ];
        let original = [r, g, b];
        let mut out = [0u8; 3];
        for (channel, slot) in out.iter_mut().enumerate() {
            let blended =
                original[channel] * (1.0 - self.intensity) + sepia[channel] * self.intensity;
            *slot = blended.round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

impl Default for SepiaTransform {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl ImageTransform for SepiaTransform {
    fn apply(&self, input: &[u8], cancel: &CancellationToken) -> Result<Bytes, StageError> {
        let decoded = image::load_from_memory(input)?;

        if cancel.is_cancelled() {
            return Err(StageError::Transform("cancelled after decode".to_string()));
        }

        let mut pixels = decoded.to_rgba8();
        for pixel in pixels.pixels_mut() {
            let [r, g, b, a] = pixel.0;
            let [r, g, b] = self.tone([r, g, b]);
            pixel.0 = [r, g, b, a];
        }

        if cancel.is_cancelled() {
            return Err(StageError::Transform("cancelled before encode".to_string()));
        }

        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(pixels).write_to(&mut encoded, ImageFormat::Png)?;
        Ok(Bytes::from(encoded.into_inner()))
    }
}

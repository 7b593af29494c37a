use crate::error::SegmentationError;
use palette::{white_point::D65, FromColor, Lab, Srgb};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Color space the samples of a `PixelBuffer` are expressed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    /// Raw channel values as supplied (0-255 for 8-bit RGB input).
    #[default]
    Rgb,
    /// CIELAB (D65), converted from sRGB.
    Lab,
}

/// Dense row-major `height x width x channels` image.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    channels: usize,
    color_space: ColorSpace,
    data: Vec<f32>,
}

impl PixelBuffer {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, SegmentationError> {
        if width == 0 || height == 0 {
            return Err(SegmentationError::InvalidInput(format!(
                "image must have positive dimensions, got {}x{}",
                width, height
            )));
        }
        if channels == 0 {
            return Err(SegmentationError::InvalidInput(
                "image must have at least one channel".to_string(),
            ));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| {
                SegmentationError::InvalidInput(format!(
                    "image size {}x{}x{} overflows",
                    width, height, channels
                ))
            })?;
        if data.len() != expected {
            return Err(SegmentationError::InvalidInput(format!(
                "buffer size mismatch: expected {} samples, got {}",
                expected,
                data.len()
            )));
        }
        if let Some(idx) = data.iter().position(|v| !v.is_finite()) {
            return Err(SegmentationError::InvalidInput(format!(
                "sample {} is not finite",
                idx
            )));
        }

        Ok(Self {
            width,
            height,
            channels,
            color_space: ColorSpace::Rgb,
            data,
        })
    }

    /// Build from packed 8-bit RGB bytes, converting into `color_space`.
    pub fn from_rgb8(
        width: usize,
        height: usize,
        rgb: &[u8],
        color_space: ColorSpace,
    ) -> Result<Self, SegmentationError> {
        if rgb.len() != width.saturating_mul(height).saturating_mul(3) {
            return Err(SegmentationError::InvalidInput(format!(
                "RGB buffer size mismatch: expected {} bytes for {}x{}, got {}",
                width.saturating_mul(height).saturating_mul(3),
                width,
                height,
                rgb.len()
            )));
        }

        let data: Vec<f32> = match color_space {
            ColorSpace::Rgb => rgb.iter().map(|&v| v as f32).collect(),
            ColorSpace::Lab => rgb
                .par_chunks_exact(3)
                .flat_map_iter(|p| {
                    let lab = rgb_to_lab([p[0], p[1], p[2]]);
                    [lab.l, lab.a, lab.b]
                })
                .collect(),
        };

        let mut buffer = Self::new(width, height, 3, data)?;
        buffer.color_space = color_space;
        Ok(buffer)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Color of the pixel with row-major index `idx`.
    pub fn pixel(&self, idx: usize) -> &[f32] {
        let start = idx * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn pixel_at(&self, row: usize, col: usize) -> &[f32] {
        self.pixel(row * self.width + col)
    }
}

fn rgb_to_lab(rgb: [u8; 3]) -> Lab<D65, f32> {
    let srgb = Srgb::new(
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    );
    Lab::from_color(srgb)
}

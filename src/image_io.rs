//! Decoding images into pixel buffers and writing segmentation results.
//!
//! Nothing in the segmentation core depends on this module.

use crate::error::SegmentationError;
use crate::pixel_buffer::{ColorSpace, PixelBuffer};
use crate::result::{QualityMetrics, RegionFeatures, RegionStatistics, SegmentationResult};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ImageIoError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("result is {result_w}x{result_h} but image is {image_w}x{image_h}")]
    DimensionMismatch {
        result_w: usize,
        result_h: usize,
        image_w: usize,
        image_h: usize,
    },
    #[error(transparent)]
    Buffer(#[from] SegmentationError),
}

/// A decoded source image together with the buffer handed to the core.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub rgb: RgbImage,
    pub buffer: PixelBuffer,
}

/// Decode `path` as 8-bit RGB, optionally blur it, and convert it into
/// `color_space`.
///
/// `smoothing_sigma <= 0` skips the blur.
pub fn load_image(
    path: &Path,
    color_space: ColorSpace,
    smoothing_sigma: f32,
) -> Result<LoadedImage, ImageIoError> {
    let t_decode = Instant::now();
    let decoded = image::open(path).map_err(|source| ImageIoError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rgb = decoded.to_rgb8();
    let decode_ms = t_decode.elapsed().as_millis();

    if smoothing_sigma > 0.0 {
        rgb = imageproc::filter::gaussian_blur_f32(&rgb, smoothing_sigma);
    }

    let buffer = rgb_to_buffer(&rgb, color_space)?;
    log::info!(
        "Loaded {} ({}x{}, {:?}, sigma={}) in {}ms",
        path.display(),
        rgb.width(),
        rgb.height(),
        color_space,
        smoothing_sigma,
        decode_ms
    );
    Ok(LoadedImage { rgb, buffer })
}

pub fn rgb_to_buffer(rgb: &RgbImage, color_space: ColorSpace) -> Result<PixelBuffer, SegmentationError> {
    PixelBuffer::from_rgb8(
        rgb.width() as usize,
        rgb.height() as usize,
        rgb.as_raw(),
        color_space,
    )
}

/// Paint every region with its mean color in `source`.
pub fn colorize(result: &SegmentationResult, source: &RgbImage) -> Result<RgbImage, ImageIoError> {
    let width = source.width() as usize;
    let height = source.height() as usize;
    if width != result.width() || height != result.height() {
        return Err(ImageIoError::DimensionMismatch {
            result_w: result.width(),
            result_h: result.height(),
            image_w: width,
            image_h: height,
        });
    }

    let mut sums = vec![[0u64; 3]; result.region_count()];
    for (pixel, &label) in source.pixels().zip(result.labels()) {
        let sum = &mut sums[label as usize];
        for c in 0..3 {
            sum[c] += pixel[c] as u64;
        }
    }
    let palette: Vec<Rgb<u8>> = sums
        .iter()
        .zip(result.regions())
        .map(|(sum, region)| {
            let n = region.pixel_count.max(1) as u64;
            Rgb([
                ((sum[0] + n / 2) / n) as u8,
                ((sum[1] + n / 2) / n) as u8,
                ((sum[2] + n / 2) / n) as u8,
            ])
        })
        .collect();

    let mut out = RgbImage::new(source.width(), source.height());
    for (pixel, &label) in out.pixels_mut().zip(result.labels()) {
        *pixel = palette[label as usize];
    }
    Ok(out)
}

pub fn save_colorized(
    result: &SegmentationResult,
    source: &RgbImage,
    path: &Path,
) -> Result<(), ImageIoError> {
    colorize(result, source)?
        .save(path)
        .map_err(|source| ImageIoError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationReport<'a> {
    pub source: String,
    pub fingerprint: String,
    pub statistics: RegionStatistics,
    pub quality: QualityMetrics,
    pub features: Vec<RegionFeatures>,
    pub result: &'a SegmentationResult,
}

impl<'a> SegmentationReport<'a> {
    /// Fails when `image` does not have the result's dimensions.
    pub fn new(
        source: &Path,
        result: &'a SegmentationResult,
        image: &PixelBuffer,
    ) -> Result<Self, ImageIoError> {
        Ok(Self {
            source: source.display().to_string(),
            fingerprint: result.fingerprint(),
            statistics: result.statistics(),
            quality: result.quality_metrics(image)?,
            features: result.all_region_features(image)?,
            result,
        })
    }
}

pub fn save_report(report: &SegmentationReport<'_>, path: &Path) -> Result<(), ImageIoError> {
    let payload = serde_json::to_string_pretty(report)?;
    fs::write(path, payload).map_err(|source| ImageIoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{segment, SegmentationParams};
    use crate::threshold::ThresholdPolicy;

    fn split_image() -> RgbImage {
        RgbImage::from_fn(6, 4, |x, _| {
            if x < 3 {
                Rgb([10, 20, 30])
            } else {
                Rgb([200, 100, 0])
            }
        })
    }

    fn segment_rgb(rgb: &RgbImage) -> (PixelBuffer, SegmentationResult) {
        let buffer = rgb_to_buffer(rgb, ColorSpace::Rgb).unwrap();
        let params = SegmentationParams {
            threshold: ThresholdPolicy::fixed(5.0),
            min_region_size: 0,
            ..SegmentationParams::default()
        };
        let result = segment(&buffer, &params, None, None).unwrap();
        (buffer, result)
    }

    #[test]
    fn colorized_output_uses_region_means() {
        let rgb = split_image();
        let (_, result) = segment_rgb(&rgb);
        assert_eq!(result.region_count(), 2);
        let painted = colorize(&result, &rgb).unwrap();
        assert_eq!(painted, rgb);
    }

    #[test]
    fn colorize_rejects_mismatched_source() {
        let (_, result) = segment_rgb(&split_image());
        let other = RgbImage::new(3, 3);
        assert!(matches!(
            colorize(&result, &other),
            Err(ImageIoError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn png_and_report_round_trip_through_disk() {
        let rgb = split_image();
        let dir = std::env::temp_dir().join(format!("mstseg-io-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("input.png");
        rgb.save(&input).unwrap();

        let loaded = load_image(&input, ColorSpace::Rgb, 0.0).unwrap();
        assert_eq!(loaded.rgb, rgb);
        let (buffer, result) = segment_rgb(&loaded.rgb);

        let png = dir.join("segments.png");
        save_colorized(&result, &loaded.rgb, &png).unwrap();
        let reread = image::open(&png).unwrap().to_rgb8();
        assert_eq!(reread.dimensions(), (6, 4));

        let json = dir.join("report.json");
        let report = SegmentationReport::new(&input, &result, &buffer).unwrap();
        save_report(&report, &json).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["statistics"]["regionCount"], 2);
        assert_eq!(value["fingerprint"].as_str().unwrap(), result.fingerprint());
        assert_eq!(value["features"][0]["area"], 12);
        assert_eq!(value["features"][1]["perimeter"], 4);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn report_rejects_buffer_of_another_size() {
        let (_, result) = segment_rgb(&split_image());
        let other = rgb_to_buffer(&RgbImage::new(2, 2), ColorSpace::Rgb).unwrap();
        let err = SegmentationReport::new(Path::new("split.png"), &result, &other).unwrap_err();
        assert!(matches!(
            err,
            ImageIoError::Buffer(SegmentationError::InvalidInput(_))
        ));
    }

    #[test]
    fn smoothing_keeps_dimensions_and_lab_has_three_channels() {
        let dir = std::env::temp_dir().join(format!("mstseg-blur-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("input.png");
        split_image().save(&input).unwrap();

        let loaded = load_image(&input, ColorSpace::Lab, 1.0).unwrap();
        assert_eq!(loaded.buffer.width(), 6);
        assert_eq!(loaded.buffer.height(), 4);
        assert_eq!(loaded.buffer.channels(), 3);
        assert_eq!(loaded.buffer.color_space(), ColorSpace::Lab);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_decode_error() {
        let err = load_image(Path::new("/nonexistent/mstseg.png"), ColorSpace::Rgb, 0.0)
            .unwrap_err();
        assert!(matches!(err, ImageIoError::Decode { .. }));
    }
}

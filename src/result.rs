use crate::edge_weights::color_distance;
use crate::error::SegmentationError;
use crate::pixel_buffer::PixelBuffer;
use serde::Serialize;
use sha2::{Digest, Sha256};

const FINGERPRINT_VERSION: u8 = 1;

/// Inclusive pixel bounds of a region.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl BoundingBox {
    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub label: u32,
    pub pixel_count: usize,
    pub mean_color: Vec<f64>,
    pub bbox: BoundingBox,
    /// Mean `(row, col)` of the region's pixels.
    pub centroid: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStatistics {
    pub region_count: usize,
    pub total_pixels: usize,
    pub mean_size: f64,
    pub min_size: usize,
    pub max_size: usize,
    pub std_size: f64,
    pub median_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    /// Pixel-weighted sample variance inside regions.
    pub intra_region_variance: f64,
    /// Mean color distance between 4-adjacent pixels with different labels.
    pub inter_region_contrast: f64,
    /// Pixel-weighted `1 / (1 + mean channel std)`, in `(0, 1]`.
    pub consistency: f64,
}

/// Shape and color descriptors of one region, measured against an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionFeatures {
    pub label: u32,
    pub area: usize,
    /// Pixel sides shared with a differently labeled 4-neighbour. The image
    /// border does not count.
    pub perimeter: usize,
    /// `perimeter^2 / (4 * pi * area)`.
    pub compactness: f64,
    /// Bounding box height over width.
    pub aspect_ratio: f64,
    pub color_mean: Vec<f64>,
    /// Population standard deviation per channel.
    pub color_std: Vec<f64>,
    pub color_min: Vec<f64>,
    pub color_max: Vec<f64>,
}

#[derive(Debug, Clone)]
struct FeatureSums {
    count: usize,
    perimeter: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    min: Vec<f64>,
    max: Vec<f64>,
}

impl FeatureSums {
    fn new(channels: usize) -> Self {
        Self {
            count: 0,
            perimeter: 0,
            sum: vec![0.0; channels],
            sum_sq: vec![0.0; channels],
            min: vec![f64::INFINITY; channels],
            max: vec![f64::NEG_INFINITY; channels],
        }
    }

    fn add(&mut self, color: &[f32], boundary_sides: usize) {
        self.count += 1;
        self.perimeter += boundary_sides;
        for (c, &v) in color.iter().enumerate() {
            let v = v as f64;
            self.sum[c] += v;
            self.sum_sq[c] += v * v;
            self.min[c] = self.min[c].min(v);
            self.max[c] = self.max[c].max(v);
        }
    }

    fn finish(self, region: &Region) -> RegionFeatures {
        let n = self.count.max(1) as f64;
        let color_mean: Vec<f64> = self.sum.iter().map(|s| s / n).collect();
        let color_std = self
            .sum_sq
            .iter()
            .zip(&color_mean)
            .map(|(sq, m)| (sq / n - m * m).max(0.0).sqrt())
            .collect();
        let area = self.count;
        let perimeter = self.perimeter as f64;
        RegionFeatures {
            label: region.label,
            area,
            perimeter: self.perimeter,
            compactness: if area > 0 {
                perimeter * perimeter / (4.0 * std::f64::consts::PI * area as f64)
            } else {
                0.0
            },
            aspect_ratio: region.bbox.height() as f64 / region.bbox.width() as f64,
            color_mean,
            color_std,
            color_min: self.min,
            color_max: self.max,
        }
    }
}

/// Final output of a segmentation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationResult {
    width: usize,
    height: usize,
    #[serde(skip)]
    labels: Vec<u32>,
    regions: Vec<Region>,
    threshold: f64,
    forest_edge_count: usize,
    merges_performed: usize,
}

impl SegmentationResult {
    pub(crate) fn new(
        width: usize,
        height: usize,
        labels: Vec<u32>,
        regions: Vec<Region>,
        threshold: f64,
        forest_edge_count: usize,
        merges_performed: usize,
    ) -> Self {
        debug_assert_eq!(labels.len(), width * height);
        debug_assert!(regions
            .iter()
            .enumerate()
            .all(|(i, r)| r.label as usize == i));
        Self {
            width,
            height,
            labels,
            regions,
            threshold,
            forest_edge_count,
            merges_performed,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major label map, one entry per pixel.
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn label_at(&self, row: usize, col: usize) -> Option<u32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.labels[row * self.width + col])
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, label: u32) -> Option<&Region> {
        self.regions.get(label as usize)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region_mask(&self, label: u32) -> Vec<bool> {
        self.labels.iter().map(|&l| l == label).collect()
    }

    /// Threshold the forest was cut at.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn forest_edge_count(&self) -> usize {
        self.forest_edge_count
    }

    pub fn merges_performed(&self) -> usize {
        self.merges_performed
    }

    pub fn statistics(&self) -> RegionStatistics {
        let mut sizes: Vec<usize> = self.regions.iter().map(|r| r.pixel_count).collect();
        sizes.sort_unstable();
        let count = sizes.len();
        let total: usize = sizes.iter().sum();
        if count == 0 {
            return RegionStatistics {
                region_count: 0,
                total_pixels: 0,
                mean_size: 0.0,
                min_size: 0,
                max_size: 0,
                std_size: 0.0,
                median_size: 0.0,
            };
        }

        let mean = total as f64 / count as f64;
        let variance = sizes
            .iter()
            .map(|&s| (s as f64 - mean) * (s as f64 - mean))
            .sum::<f64>()
            / count as f64;
        let median = if count % 2 == 1 {
            sizes[count / 2] as f64
        } else {
            (sizes[count / 2 - 1] + sizes[count / 2]) as f64 / 2.0
        };

        RegionStatistics {
            region_count: count,
            total_pixels: total,
            mean_size: mean,
            min_size: sizes[0],
            max_size: sizes[count - 1],
            std_size: variance.sqrt(),
            median_size: median,
        }
    }

    /// Color-coherence metrics measured against `image`, which must have the
    /// result's dimensions.
    ///
    /// Regions of a single pixel contribute nothing to the variance or
    /// consistency sums.
    pub fn quality_metrics(
        &self,
        image: &PixelBuffer,
    ) -> Result<QualityMetrics, SegmentationError> {
        self.check_image(image)?;
        let channels = image.channels();
        let region_count = self.regions.len();

        let mut means = vec![0.0f64; region_count * channels];
        let mut counts = vec![0usize; region_count];
        for (idx, &label) in self.labels.iter().enumerate() {
            let l = label as usize;
            counts[l] += 1;
            for (c, &v) in image.pixel(idx).iter().enumerate() {
                means[l * channels + c] += v as f64;
            }
        }
        for (l, &n) in counts.iter().enumerate() {
            for m in &mut means[l * channels..(l + 1) * channels] {
                *m /= n.max(1) as f64;
            }
        }

        let mut sq_dev = vec![0.0f64; region_count * channels];
        for (idx, &label) in self.labels.iter().enumerate() {
            let l = label as usize;
            for (c, &v) in image.pixel(idx).iter().enumerate() {
                let d = v as f64 - means[l * channels + c];
                sq_dev[l * channels + c] += d * d;
            }
        }

        let mut variance_sum = 0.0;
        let mut variance_pixels = 0usize;
        let mut consistency_sum = 0.0;
        for (l, &n) in counts.iter().enumerate() {
            if n < 2 {
                continue;
            }
            let per_channel = &sq_dev[l * channels..(l + 1) * channels];
            let pooled_mean = means[l * channels..(l + 1) * channels].iter().sum::<f64>()
                / channels as f64;
            // Variance over every sample of the region, channels flattened.
            let flattened = per_channel
                .iter()
                .zip(&means[l * channels..(l + 1) * channels])
                .map(|(sq, m)| sq + n as f64 * (m - pooled_mean) * (m - pooled_mean))
                .sum::<f64>()
                / (n * channels) as f64;
            variance_sum += flattened * n as f64;
            variance_pixels += n;

            let mean_std = per_channel
                .iter()
                .map(|sq| (sq / n as f64).sqrt())
                .sum::<f64>()
                / channels as f64;
            consistency_sum += n as f64 / (1.0 + mean_std);
        }

        let mut contrast_sum = 0.0;
        let mut boundary_pairs = 0usize;
        for row in 0..self.height {
            for col in 0..self.width {
                let idx = row * self.width + col;
                let mut neighbors = [None, None];
                if col + 1 < self.width {
                    neighbors[0] = Some(idx + 1);
                }
                if row + 1 < self.height {
                    neighbors[1] = Some(idx + self.width);
                }
                for other in neighbors.into_iter().flatten() {
                    if self.labels[idx] != self.labels[other] {
                        contrast_sum += color_distance(image.pixel(idx), image.pixel(other));
                        boundary_pairs += 1;
                    }
                }
            }
        }

        let total = self.labels.len().max(1) as f64;
        Ok(QualityMetrics {
            intra_region_variance: if variance_pixels > 0 {
                variance_sum / variance_pixels as f64
            } else {
                0.0
            },
            inter_region_contrast: if boundary_pairs > 0 {
                contrast_sum / boundary_pairs as f64
            } else {
                0.0
            },
            consistency: consistency_sum / total,
        })
    }

    /// Shape and color features of region `label` in `image`.
    pub fn region_features(
        &self,
        label: u32,
        image: &PixelBuffer,
    ) -> Result<RegionFeatures, SegmentationError> {
        self.check_image(image)?;
        let region = self.region(label).ok_or_else(|| {
            SegmentationError::InvalidInput(format!(
                "no region with label {} ({} regions)",
                label,
                self.regions.len()
            ))
        })?;
        let mut sums = FeatureSums::new(image.channels());
        for (idx, &l) in self.labels.iter().enumerate() {
            if l == label {
                sums.add(image.pixel(idx), self.boundary_sides(idx));
            }
        }
        Ok(sums.finish(region))
    }

    /// Features of every region, in label order, from a single pass.
    pub fn all_region_features(
        &self,
        image: &PixelBuffer,
    ) -> Result<Vec<RegionFeatures>, SegmentationError> {
        self.check_image(image)?;
        let mut sums = vec![FeatureSums::new(image.channels()); self.regions.len()];
        for (idx, &label) in self.labels.iter().enumerate() {
            sums[label as usize].add(image.pixel(idx), self.boundary_sides(idx));
        }
        Ok(sums
            .into_iter()
            .zip(&self.regions)
            .map(|(s, region)| s.finish(region))
            .collect())
    }

    /// Count of in-bounds 4-neighbours of `idx` carrying another label.
    fn boundary_sides(&self, idx: usize) -> usize {
        let (row, col) = (idx / self.width, idx % self.width);
        let label = self.labels[idx];
        let mut sides = 0;
        if row > 0 && self.labels[idx - self.width] != label {
            sides += 1;
        }
        if row + 1 < self.height && self.labels[idx + self.width] != label {
            sides += 1;
        }
        if col > 0 && self.labels[idx - 1] != label {
            sides += 1;
        }
        if col + 1 < self.width && self.labels[idx + 1] != label {
            sides += 1;
        }
        sides
    }

    fn check_image(&self, image: &PixelBuffer) -> Result<(), SegmentationError> {
        if image.width() != self.width
            || image.height() != self.height
            || image.pixel_count() != self.labels.len()
        {
            return Err(SegmentationError::InvalidInput(format!(
                "result is {}x{} but image is {}x{}",
                self.width,
                self.height,
                image.width(),
                image.height()
            )));
        }
        Ok(())
    }

    /// SHA-256 over dimensions, labels and region statistics.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([FINGERPRINT_VERSION]);
        hasher.update((self.width as u64).to_le_bytes());
        hasher.update((self.height as u64).to_le_bytes());
        for &label in &self.labels {
            hasher.update(label.to_le_bytes());
        }
        for region in &self.regions {
            hasher.update((region.pixel_count as u64).to_le_bytes());
            for &c in &region.mean_color {
                hasher.update(c.to_bits().to_le_bytes());
            }
            hasher.update((region.bbox.min_row as u64).to_le_bytes());
            hasher.update((region.bbox.min_col as u64).to_le_bytes());
            hasher.update((region.bbox.max_row as u64).to_le_bytes());
            hasher.update((region.bbox.max_col as u64).to_le_bytes());
        }
        hasher.update(self.threshold.to_bits().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Recompute per-region statistics from a canonical label map.
pub(crate) fn collect_regions(image: &PixelBuffer, labels: &[u32], region_count: usize) -> Vec<Region> {
    let width = image.width();
    let channels = image.channels();
    let mut counts = vec![0usize; region_count];
    let mut color_sums = vec![0.0f64; region_count * channels];
    let mut row_sums = vec![0.0f64; region_count];
    let mut col_sums = vec![0.0f64; region_count];
    let mut bounds: Vec<Option<BoundingBox>> = vec![None; region_count];

    for (idx, &label) in labels.iter().enumerate() {
        let l = label as usize;
        let row = idx / width;
        let col = idx % width;
        counts[l] += 1;
        row_sums[l] += row as f64;
        col_sums[l] += col as f64;
        for (c, &v) in image.pixel(idx).iter().enumerate() {
            color_sums[l * channels + c] += v as f64;
        }
        bounds[l] = Some(match bounds[l] {
            None => BoundingBox {
                min_row: row,
                min_col: col,
                max_row: row,
                max_col: col,
            },
            Some(b) => BoundingBox {
                min_row: b.min_row.min(row),
                min_col: b.min_col.min(col),
                max_row: b.max_row.max(row),
                max_col: b.max_col.max(col),
            },
        });
    }

    bounds
        .into_iter()
        .enumerate()
        .filter_map(|(l, bbox)| {
            let bbox = bbox?;
            let n = counts[l] as f64;
            Some(Region {
                label: l as u32,
                pixel_count: counts[l],
                mean_color: color_sums[l * channels..(l + 1) * channels]
                    .iter()
                    .map(|s| s / n)
                    .collect(),
                bbox,
                centroid: (row_sums[l] / n, col_sums[l] / n),
            })
        })
        .collect()
}

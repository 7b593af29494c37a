use crate::disjoint_set::DisjointSet;
use crate::error::SegmentationError;
use crate::mst::SpanningForest;
use crate::pixel_buffer::PixelBuffer;
use serde::{Deserialize, Serialize};

/// How the cut threshold `T` is chosen.
///
/// Derived policies read the weight distribution of the spanning forest.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ThresholdPolicy {
    /// Explicit `T >= 0`; `f64::INFINITY` keeps every forest edge.
    Fixed { value: f64 },
    /// `p`-th percentile (0-100, linear interpolation) of forest weights.
    Percentile { p: f64 },
    Median,
    /// `mean + k * std` of forest weights.
    MeanStd { k: f64 },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::MeanStd { k: 0.5 }
    }
}

impl ThresholdPolicy {
    pub fn fixed(value: f64) -> Self {
        ThresholdPolicy::Fixed { value }
    }

    pub fn validate(&self) -> Result<(), SegmentationError> {
        match *self {
            ThresholdPolicy::Fixed { value } => {
                if value.is_nan() || value < 0.0 {
                    return Err(SegmentationError::parameter(
                        "threshold",
                        format!("must be >= 0, got {}", value),
                    ));
                }
            }
            ThresholdPolicy::Percentile { p } => {
                if !(0.0..=100.0).contains(&p) {
                    return Err(SegmentationError::parameter(
                        "threshold",
                        format!("percentile must be within 0..=100, got {}", p),
                    ));
                }
            }
            ThresholdPolicy::Median => {}
            ThresholdPolicy::MeanStd { k } => {
                if !k.is_finite() {
                    return Err(SegmentationError::parameter(
                        "threshold",
                        format!("standard deviation factor must be finite, got {}", k),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve to a concrete threshold for `forest`.
    ///
    /// Derived policies on an empty forest resolve to 0; negative derived
    /// values are clamped to 0.
    pub fn resolve(&self, forest: &SpanningForest) -> Result<f64, SegmentationError> {
        self.validate()?;
        // Forest edges are already in ascending weight order.
        let weights: Vec<f64> = forest.weights().collect();
        let value = match *self {
            ThresholdPolicy::Fixed { value } => return Ok(value),
            ThresholdPolicy::Percentile { p } => percentile(&weights, p),
            ThresholdPolicy::Median => percentile(&weights, 50.0),
            ThresholdPolicy::MeanStd { k } => {
                if weights.is_empty() {
                    0.0
                } else {
                    let n = weights.len() as f64;
                    let mean = weights.iter().sum::<f64>() / n;
                    let variance = weights.iter().map(|w| (w - mean) * (w - mean)).sum::<f64>() / n;
                    mean + k * variance.sqrt()
                }
            }
        };
        Ok(value.max(0.0))
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Components left after cutting the forest at a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    labels: Vec<u32>,
    region_count: usize,
    threshold: f64,
}

impl Partition {
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn region_count(&self) -> usize {
        self.region_count
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

pub struct ThresholdPartitioner;

impl ThresholdPartitioner {
    /// Keep forest edges with `weight <= threshold`, then label the
    /// resulting components in row-major first-discovery order.
    pub fn partition(
        image: &PixelBuffer,
        forest: &SpanningForest,
        policy: &ThresholdPolicy,
    ) -> Result<Partition, SegmentationError> {
        let threshold = policy.resolve(forest)?;
        Ok(Self::cut(image, forest, threshold))
    }

    pub(crate) fn cut(image: &PixelBuffer, forest: &SpanningForest, threshold: f64) -> Partition {
        let mut set = DisjointSet::from_pixels(image);
        for edge in forest.edges().iter().filter(|e| e.weight <= threshold) {
            set.union(edge.u, edge.v, edge.weight);
        }
        let (labels, region_count) = set.canonical_labels();
        log::debug!(
            "Threshold {:.4} kept {} of {} forest edges, {} regions",
            threshold,
            forest.edges().iter().filter(|e| e.weight <= threshold).count(),
            forest.edges().len(),
            region_count
        );

        Partition {
            labels,
            region_count,
            threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_weights::EdgeWeightModel;
    use crate::mst::MstBuilder;
    use crate::pixel_graph::{Connectivity, PixelGraph};

    fn forest_for(image: &PixelBuffer) -> SpanningForest {
        let mut graph = PixelGraph::build(image, Connectivity::Four).unwrap();
        EdgeWeightModel::new(1.0, 0.1)
            .unwrap()
            .assign_weights(&mut graph);
        MstBuilder::build(&graph)
    }

    fn gradient_image(width: usize, height: usize) -> PixelBuffer {
        let data = (0..width * height)
            .map(|i| ((i * 13) % 29) as f32 * 3.0)
            .collect();
        PixelBuffer::new(width, height, 1, data).unwrap()
    }

    #[test]
    fn zero_threshold_keeps_every_pixel_apart() {
        let image = gradient_image(5, 4);
        let forest = forest_for(&image);
        let partition =
            ThresholdPartitioner::partition(&image, &forest, &ThresholdPolicy::fixed(0.0)).unwrap();
        assert_eq!(partition.region_count(), 20);
        assert_eq!(partition.labels(), (0..20).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn infinite_threshold_yields_one_region() {
        let image = gradient_image(5, 4);
        let forest = forest_for(&image);
        let partition = ThresholdPartitioner::partition(
            &image,
            &forest,
            &ThresholdPolicy::fixed(f64::INFINITY),
        )
        .unwrap();
        assert_eq!(partition.region_count(), 1);
        assert!(partition.labels().iter().all(|&l| l == 0));
    }

    #[test]
    fn region_count_is_non_increasing_in_threshold() {
        let image = gradient_image(8, 6);
        let forest = forest_for(&image);
        let mut previous = usize::MAX;
        for step in 0..40 {
            let t = step as f64 * 2.5;
            let count = ThresholdPartitioner::cut(&image, &forest, t).region_count();
            assert!(count <= previous, "count rose at T={}", t);
            previous = count;
        }
    }

    #[test]
    fn labels_are_assigned_in_row_major_discovery_order() {
        // Columns 0-1 dark, column 2 bright: second region first seen at (0, 2).
        let image =
            PixelBuffer::new(3, 2, 1, vec![0.0, 0.0, 100.0, 0.0, 0.0, 100.0]).unwrap();
        let forest = forest_for(&image);
        let partition = ThresholdPartitioner::cut(&image, &forest, 1.0);
        assert_eq!(partition.labels(), &[0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn derived_policies_read_forest_weights() {
        let image = PixelBuffer::new(5, 1, 1, vec![0.0, 1.0, 3.0, 6.0, 10.0]).unwrap();
        let forest = forest_for(&image);
        // Weights: 1.1, 2.1, 3.1, 4.1
        let median = ThresholdPolicy::Median.resolve(&forest).unwrap();
        assert!((median - 2.6).abs() < 1e-9);
        let p100 = ThresholdPolicy::Percentile { p: 100.0 }.resolve(&forest).unwrap();
        assert!((p100 - 4.1).abs() < 1e-9);
        let mean_std = ThresholdPolicy::MeanStd { k: 0.0 }.resolve(&forest).unwrap();
        assert!((mean_std - 2.6).abs() < 1e-9);
        let default = ThresholdPolicy::default().resolve(&forest).unwrap();
        assert!(default > mean_std);
    }

    #[test]
    fn derived_policies_on_empty_forest_resolve_to_zero() {
        let image = PixelBuffer::new(1, 1, 1, vec![5.0]).unwrap();
        let forest = forest_for(&image);
        assert_eq!(ThresholdPolicy::Median.resolve(&forest).unwrap(), 0.0);
        assert_eq!(ThresholdPolicy::default().resolve(&forest).unwrap(), 0.0);
    }

    #[test]
    fn invalid_policies_are_parameter_errors() {
        for policy in [
            ThresholdPolicy::fixed(-1.0),
            ThresholdPolicy::fixed(f64::NAN),
            ThresholdPolicy::Percentile { p: 101.0 },
            ThresholdPolicy::MeanStd { k: f64::NAN },
        ] {
            assert!(matches!(
                policy.validate(),
                Err(SegmentationError::Parameter { name: "threshold", .. })
            ));
        }
    }

    #[test]
    fn policy_serializes_with_mode_tag() {
        let json = serde_json::to_string(&ThresholdPolicy::Percentile { p: 75.0 }).unwrap();
        assert_eq!(json, r#"{"mode":"percentile","p":75.0}"#);
        let parsed: ThresholdPolicy = serde_json::from_str(r#"{"mode":"median"}"#).unwrap();
        assert_eq!(parsed, ThresholdPolicy::Median);
    }
}

//! Graph-based image segmentation over a minimum spanning forest.
//!
//! Pixels become nodes of a 4- or 8-connected grid graph, edges are weighted
//! by color and spatial distance, Kruskal builds the spanning forest, and
//! the forest is cut at a threshold. Regions below a size floor are then
//! merged into their closest neighbor.

pub mod config;
pub mod disjoint_set;
pub mod edge_weights;
pub mod error;
pub mod image_io;
pub mod mst;
pub mod pipeline;
pub mod pixel_buffer;
pub mod pixel_graph;
pub mod progress;
pub mod region_merger;
pub mod result;
pub mod threshold;

pub use config::{ConfigError, SegmentationConfig, ThresholdSetting};
pub use disjoint_set::DisjointSet;
pub use edge_weights::EdgeWeightModel;
pub use error::SegmentationError;
pub use mst::{ForestEdge, MstBuilder, SpanningForest};
pub use pipeline::{segment, MstSegmenter, SegmentationParams, Segmenter};
pub use pixel_buffer::{ColorSpace, PixelBuffer};
pub use pixel_graph::{Connectivity, Edge, PixelGraph, PixelNode};
pub use progress::{CancellationToken, ProgressListener, RunContext, Stage};
pub use region_merger::{MergeOutcome, RegionMerger};
pub use result::{
    BoundingBox, QualityMetrics, Region, RegionFeatures, RegionStatistics, SegmentationResult,
};
pub use threshold::{Partition, ThresholdPartitioner, ThresholdPolicy};

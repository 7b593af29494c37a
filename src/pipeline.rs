use crate::edge_weights::EdgeWeightModel;
use crate::error::SegmentationError;
use crate::mst::{MstBuilder, SpanningForest};
use crate::pixel_buffer::PixelBuffer;
use crate::pixel_graph::{Connectivity, PixelGraph};
use crate::progress::{CancellationToken, ProgressListener, RunContext, Stage};
use crate::region_merger::RegionMerger;
use crate::result::SegmentationResult;
use crate::threshold::{ThresholdPartitioner, ThresholdPolicy};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationParams {
    pub connectivity: Connectivity,
    pub alpha: f64,
    pub beta: f64,
    pub threshold: ThresholdPolicy,
    /// Regions below this many pixels are merged away; `0` disables merging.
    pub min_region_size: usize,
    pub max_merges: Option<usize>,
    pub memory_limit_bytes: Option<usize>,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Four,
            alpha: 1.0,
            beta: 0.1,
            threshold: ThresholdPolicy::default(),
            min_region_size: 10,
            max_merges: None,
            memory_limit_bytes: None,
        }
    }
}

impl SegmentationParams {
    pub fn validate(&self) -> Result<(), SegmentationError> {
        EdgeWeightModel::new(self.alpha, self.beta)?;
        self.threshold.validate()
    }

    fn weight_model(&self) -> Result<EdgeWeightModel, SegmentationError> {
        EdgeWeightModel::new(self.alpha, self.beta)
    }

    fn merger(&self) -> RegionMerger {
        let merger = RegionMerger::new(self.min_region_size);
        match self.max_merges {
            Some(max) => merger.with_max_merges(max),
            None => merger,
        }
    }
}

/// A segmentation algorithm family.
pub trait Segmenter: Send + Sync {
    fn name(&self) -> &'static str;

    fn segment(
        &self,
        image: &PixelBuffer,
        ctx: RunContext<'_>,
    ) -> Result<SegmentationResult, SegmentationError>;
}

/// Segment `image` by cutting its minimum spanning forest.
///
/// Reports the five checkpoints to `progress` and checks `cancel` at entry
/// and after every checkpoint but the last.
pub fn segment(
    image: &PixelBuffer,
    params: &SegmentationParams,
    progress: Option<&dyn ProgressListener>,
    cancel: Option<&CancellationToken>,
) -> Result<SegmentationResult, SegmentationError> {
    run(image, params, RunContext::new(progress, cancel))
}

fn run(
    image: &PixelBuffer,
    params: &SegmentationParams,
    ctx: RunContext<'_>,
) -> Result<SegmentationResult, SegmentationError> {
    let timing_enabled = debug_timing_enabled();
    let t_total = Instant::now();
    log::info!(
        "Segmenting {}x{}x{} image: connectivity={} alpha={} beta={} threshold={:?} min_region_size={}",
        image.width(),
        image.height(),
        image.channels(),
        u8::from(params.connectivity),
        params.alpha,
        params.beta,
        params.threshold,
        params.min_region_size
    );

    params.validate()?;
    if ctx.is_cancelled() {
        return Err(SegmentationError::Cancelled { stage: None });
    }

    let mut timings = StageTimings::default();
    let (graph, forest) = build_forest(image, params, ctx, &mut timings)?;

    let t_cut = Instant::now();
    let partition = ThresholdPartitioner::partition(image, &forest, &params.threshold)?;
    timings.cut_ms = t_cut.elapsed().as_millis();
    checkpoint(ctx, Stage::ThresholdApplied)?;

    let t_merge = Instant::now();
    let outcome = params.merger().merge(&graph, &partition);
    timings.merge_ms = t_merge.elapsed().as_millis();
    ctx.checkpoint(Stage::RegionsMerged);

    let result = SegmentationResult::new(
        image.width(),
        image.height(),
        outcome.labels,
        outcome.regions,
        partition.threshold(),
        forest.edges().len(),
        outcome.merges_performed,
    );

    let total_ms = t_total.elapsed().as_millis();
    if timing_enabled {
        log::debug!(
            "Segmentation timing graph={}ms weights={}ms mst={}ms cut={}ms merge={}ms total={}ms",
            timings.graph_ms,
            timings.weights_ms,
            timings.mst_ms,
            timings.cut_ms,
            timings.merge_ms,
            total_ms
        );
    }
    log::info!(
        "Segmentation complete: {} regions (threshold {:.4}, {} before merging, {} merges) in {}ms",
        result.region_count(),
        partition.threshold(),
        partition.region_count(),
        result.merges_performed(),
        total_ms
    );

    Ok(result)
}

#[derive(Default)]
struct StageTimings {
    graph_ms: u128,
    weights_ms: u128,
    mst_ms: u128,
    cut_ms: u128,
    merge_ms: u128,
}

/// Graph, weights and spanning forest: the part shared by every cut.
fn build_forest<'a>(
    image: &'a PixelBuffer,
    params: &SegmentationParams,
    ctx: RunContext<'_>,
    timings: &mut StageTimings,
) -> Result<(PixelGraph<'a>, SpanningForest), SegmentationError> {
    if let Some(limit) = params.memory_limit_bytes {
        let required = PixelGraph::estimated_bytes(
            image.width(),
            image.height(),
            image.channels(),
            params.connectivity,
        );
        if required > limit {
            log::warn!(
                "Refusing {}x{} image: graph needs ~{} bytes, limit is {}",
                image.width(),
                image.height(),
                required,
                limit
            );
            return Err(SegmentationError::ResourceExhausted {
                required_bytes: required,
                limit_bytes: limit,
            });
        }
    }

    let t_graph = Instant::now();
    let mut graph = PixelGraph::build(image, params.connectivity)?;
    timings.graph_ms = t_graph.elapsed().as_millis();
    checkpoint(ctx, Stage::GraphBuilt)?;

    let t_weights = Instant::now();
    params.weight_model()?.assign_weights(&mut graph);
    timings.weights_ms = t_weights.elapsed().as_millis();
    checkpoint(ctx, Stage::WeightsComputed)?;

    let t_mst = Instant::now();
    let forest = MstBuilder::build(&graph);
    timings.mst_ms = t_mst.elapsed().as_millis();
    checkpoint(ctx, Stage::MstBuilt)?;

    Ok((graph, forest))
}

fn checkpoint(ctx: RunContext<'_>, stage: Stage) -> Result<(), SegmentationError> {
    ctx.checkpoint(stage);
    if ctx.is_cancelled() {
        log::info!("Segmentation cancelled after {}", stage.name());
        return Err(SegmentationError::Cancelled { stage: Some(stage) });
    }
    Ok(())
}

fn debug_timing_enabled() -> bool {
    matches!(
        std::env::var("MSTSEG_DEBUG_TIMING").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

/// Minimum-spanning-forest segmentation.
#[derive(Debug, Clone, Default)]
pub struct MstSegmenter {
    params: SegmentationParams,
}

impl MstSegmenter {
    pub fn new(params: SegmentationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    /// One result per threshold, sharing a single graph and forest.
    ///
    /// The configured threshold policy is ignored; each entry of
    /// `thresholds` is used as a fixed cut.
    pub fn segment_levels(
        &self,
        image: &PixelBuffer,
        thresholds: &[f64],
    ) -> Result<Vec<SegmentationResult>, SegmentationError> {
        for &t in thresholds {
            ThresholdPolicy::fixed(t).validate()?;
        }

        let mut timings = StageTimings::default();
        let (graph, forest) =
            build_forest(image, &self.params, RunContext::default(), &mut timings)?;
        Ok(self.cut_levels(image, &graph, &forest, thresholds))
    }

    /// `levels` cuts with thresholds evenly spaced from the lightest to the
    /// heaviest forest edge, finest first.
    pub fn segment_hierarchy(
        &self,
        image: &PixelBuffer,
        levels: usize,
    ) -> Result<Vec<SegmentationResult>, SegmentationError> {
        if levels == 0 {
            return Err(SegmentationError::parameter(
                "levels",
                "hierarchy needs at least one level",
            ));
        }

        let mut timings = StageTimings::default();
        let (graph, forest) =
            build_forest(image, &self.params, RunContext::default(), &mut timings)?;
        let low = forest.min_weight().unwrap_or(0.0);
        let high = forest.max_weight().unwrap_or(0.0);
        let thresholds: Vec<f64> = (0..levels)
            .map(|i| {
                if levels == 1 {
                    low
                } else {
                    low + (high - low) * i as f64 / (levels - 1) as f64
                }
            })
            .collect();
        log::debug!(
            "Hierarchy of {} levels over forest weights {:.4}..={:.4}",
            levels,
            low,
            high
        );
        Ok(self.cut_levels(image, &graph, &forest, &thresholds))
    }

    fn cut_levels(
        &self,
        image: &PixelBuffer,
        graph: &PixelGraph,
        forest: &SpanningForest,
        thresholds: &[f64],
    ) -> Vec<SegmentationResult> {
        let merger = self.params.merger();
        thresholds
            .iter()
            .map(|&threshold| {
                let partition = ThresholdPartitioner::cut(image, forest, threshold);
                let outcome = merger.merge(graph, &partition);
                SegmentationResult::new(
                    image.width(),
                    image.height(),
                    outcome.labels,
                    outcome.regions,
                    threshold,
                    forest.edges().len(),
                    outcome.merges_performed,
                )
            })
            .collect()
    }
}

impl Segmenter for MstSegmenter {
    fn name(&self) -> &'static str {
        "mst"
    }

    fn segment(
        &self,
        image: &PixelBuffer,
        ctx: RunContext<'_>,
    ) -> Result<SegmentationResult, SegmentationError> {
        run(image, &self.params, ctx)
    }
}

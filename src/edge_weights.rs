use crate::error::SegmentationError;
use crate::pixel_graph::{PixelGraph, PixelNode};
use rayon::prelude::*;

/// `weight = alpha * |color_u - color_v| + beta * |pos_u - pos_v|`
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EdgeWeightModel {
    alpha: f64,
    beta: f64,
}

impl EdgeWeightModel {
    pub fn new(alpha: f64, beta: f64) -> Result<Self, SegmentationError> {
        validate_coefficient("alpha", alpha)?;
        validate_coefficient("beta", beta)?;
        Ok(Self { alpha, beta })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn weight(&self, a: &PixelNode, b: &PixelNode) -> f64 {
        self.between(a.color, b.color, (a.row, a.col), (b.row, b.col))
    }

    fn between(
        &self,
        a_color: &[f32],
        b_color: &[f32],
        a_pos: (usize, usize),
        b_pos: (usize, usize),
    ) -> f64 {
        self.alpha * color_distance(a_color, b_color) + self.beta * spatial_distance(a_pos, b_pos)
    }

    /// Fill in every edge weight of `graph`.
    ///
    /// Edges are independent, so this runs on the rayon pool; each weight is
    /// written back into its own slot so generation order is untouched.
    pub fn assign_weights(&self, graph: &mut PixelGraph) {
        let image = graph.image();
        let width = image.width();
        graph.edges_mut().par_iter_mut().for_each(|edge| {
            edge.weight = self.between(
                image.pixel(edge.u),
                image.pixel(edge.v),
                (edge.u / width, edge.u % width),
                (edge.v / width, edge.v % width),
            );
        });
    }
}

fn validate_coefficient(name: &'static str, value: f64) -> Result<(), SegmentationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SegmentationError::parameter(
            name,
            format!("must be a finite value > 0, got {}", value),
        ));
    }
    Ok(())
}

/// Euclidean norm of the per-channel difference.
pub fn color_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Euclidean distance between `(row, col)` positions.
pub fn spatial_distance(a: (usize, usize), b: (usize, usize)) -> f64 {
    let dr = a.0 as f64 - b.0 as f64;
    let dc = a.1 as f64 - b.1 as f64;
    (dr * dr + dc * dc).sqrt()
}

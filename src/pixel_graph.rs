//! Pixel adjacency graph.
//!
//! Nodes are pixels identified by their row-major index. Each node only emits
//! edges to its forward neighbors (larger index), so every adjacent pair
//! appears exactly once and always as `u < v`.

use crate::error::SegmentationError;
use crate::pixel_buffer::PixelBuffer;
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Neighborhood used when connecting pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

impl Connectivity {
    /// Forward offsets `(d_row, d_col)` in ascending neighbor-index order.
    fn forward_offsets(self) -> &'static [(usize, isize)] {
        match self {
            Connectivity::Four => &[(0, 1), (1, 0)],
            Connectivity::Eight => &[(0, 1), (1, -1), (1, 0), (1, 1)],
        }
    }

    /// Number of edges a `width x height` grid has under this neighborhood.
    pub fn edge_count(self, width: usize, height: usize) -> usize {
        let orthogonal = height * width.saturating_sub(1) + height.saturating_sub(1) * width;
        match self {
            Connectivity::Four => orthogonal,
            Connectivity::Eight => {
                orthogonal + 2 * height.saturating_sub(1) * width.saturating_sub(1)
            }
        }
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = SegmentationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Connectivity::Four),
            8 => Ok(Connectivity::Eight),
            other => Err(SegmentationError::parameter(
                "connectivity",
                format!("must be 4 or 8, got {}", other),
            )),
        }
    }
}

impl From<Connectivity> for u8 {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }
}

/// Undirected edge between two grid-adjacent pixels, `u < v`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Edge {
    pub u: usize,
    pub v: usize,
    pub weight: f64,
}

/// A pixel viewed through its graph.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PixelNode<'a> {
    pub id: usize,
    pub row: usize,
    pub col: usize,
    pub color: &'a [f32],
}

#[derive(Debug, Clone)]
pub struct PixelGraph<'a> {
    image: &'a PixelBuffer,
    connectivity: Connectivity,
    edges: Vec<Edge>,
}

impl<'a> PixelGraph<'a> {
    /// Build the forward-neighbor edge list for `image`.
    ///
    /// Edge weights are left at zero until `EdgeWeightModel::assign_weights`
    /// fills them in.
    pub fn build(
        image: &'a PixelBuffer,
        connectivity: Connectivity,
    ) -> Result<Self, SegmentationError> {
        let width = image.width();
        let height = image.height();
        if width * height == 0 || image.channels() == 0 {
            return Err(SegmentationError::InvalidInput(
                "cannot build a graph over an empty image".to_string(),
            ));
        }

        let edge_count = connectivity.edge_count(width, height);
        let mut edges = Vec::new();
        edges.try_reserve_exact(edge_count).map_err(|_| {
            SegmentationError::ResourceExhausted {
                required_bytes: edge_count.saturating_mul(size_of::<Edge>()),
                limit_bytes: 0,
            }
        })?;

        let offsets = connectivity.forward_offsets();
        for row in 0..height {
            for col in 0..width {
                let u = row * width + col;
                for &(d_row, d_col) in offsets {
                    let n_row = row + d_row;
                    let n_col = col as isize + d_col;
                    if n_row >= height || n_col < 0 || n_col as usize >= width {
                        continue;
                    }
                    edges.push(Edge {
                        u,
                        v: n_row * width + n_col as usize,
                        weight: 0.0,
                    });
                }
            }
        }

        debug_assert_eq!(edges.len(), edge_count);
        Ok(Self {
            image,
            connectivity,
            edges,
        })
    }

    /// Rough byte footprint of a graph plus the disjoint sets run over it.
    pub fn estimated_bytes(
        width: usize,
        height: usize,
        channels: usize,
        connectivity: Connectivity,
    ) -> usize {
        let nodes = width.saturating_mul(height);
        let edges = connectivity.edge_count(width, height);
        // parent + size + max weight + color sums, twice (MST and cut).
        let per_node = 2 * (2 * size_of::<usize>() + size_of::<f64>() + channels * size_of::<f64>())
            + size_of::<u32>();
        // edge + sort index + forest copy
        let per_edge = 2 * size_of::<Edge>() + size_of::<usize>();
        nodes
            .saturating_mul(per_node)
            .saturating_add(edges.saturating_mul(per_edge))
    }

    pub fn image(&self) -> &'a PixelBuffer {
        self.image
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn width(&self) -> usize {
        self.image.width()
    }

    pub fn height(&self) -> usize {
        self.image.height()
    }

    pub fn node_count(&self) -> usize {
        self.image.pixel_count()
    }

    pub fn node(&self, id: usize) -> PixelNode<'a> {
        let width = self.image.width();
        PixelNode {
            id,
            row: id / width,
            col: id % width,
            color: self.image.pixel(id),
        }
    }

    /// Edges in generation order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub(crate) fn edges_mut(&mut self) -> &mut [Edge] {
        &mut self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn gray(width: usize, height: usize) -> PixelBuffer {
        PixelBuffer::new(width, height, 1, vec![0.0; width * height]).unwrap()
    }

    fn assert_graph_invariants(graph: &PixelGraph) {
        let width = graph.width();
        let mut seen = HashSet::new();
        for edge in graph.edges() {
            assert!(edge.u < edge.v, "edge {:?} is not canonical", edge);
            assert!(seen.insert((edge.u, edge.v)), "duplicate edge {:?}", edge);
            let (ur, uc) = ((edge.u / width) as isize, (edge.u % width) as isize);
            let (vr, vc) = ((edge.v / width) as isize, (edge.v % width) as isize);
            let (dr, dc) = ((vr - ur).abs(), (vc - uc).abs());
            match graph.connectivity() {
                Connectivity::Four => assert_eq!(dr + dc, 1),
                Connectivity::Eight => assert!(dr <= 1 && dc <= 1 && dr + dc >= 1),
            }
        }
    }

    #[test]
    fn four_connected_grid_has_expected_edges() {
        let image = gray(4, 3);
        let graph = PixelGraph::build(&image, Connectivity::Four).unwrap();
        assert_eq!(graph.node_count(), 12);
        assert_eq!(graph.edges().len(), 3 * 3 + 2 * 4);
        assert_graph_invariants(&graph);
    }

    #[test]
    fn eight_connected_grid_adds_diagonals() {
        let image = gray(4, 3);
        let graph = PixelGraph::build(&image, Connectivity::Eight).unwrap();
        assert_eq!(graph.edges().len(), 17 + 2 * 2 * 3);
        assert_graph_invariants(&graph);
    }

    #[test]
    fn generation_order_is_row_major_forward() {
        let image = gray(3, 2);
        let graph = PixelGraph::build(&image, Connectivity::Eight).unwrap();
        let pairs: Vec<(usize, usize)> = graph.edges().iter().map(|e| (e.u, e.v)).collect();
        assert_eq!(
            &pairs[..6],
            &[(0, 1), (0, 3), (0, 4), (1, 2), (1, 3), (1, 4)]
        );
    }

    #[test]
    fn degenerate_shapes_are_valid() {
        let row = gray(5, 1);
        let graph = PixelGraph::build(&row, Connectivity::Eight).unwrap();
        assert_eq!(graph.edges().len(), 4);

        let column = gray(1, 5);
        let graph = PixelGraph::build(&column, Connectivity::Eight).unwrap();
        assert_eq!(graph.edges().len(), 4);

        let single = gray(1, 1);
        let graph = PixelGraph::build(&single, Connectivity::Four).unwrap();
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn connectivity_parses_only_four_and_eight() {
        assert_eq!(Connectivity::try_from(4).unwrap(), Connectivity::Four);
        assert_eq!(Connectivity::try_from(8).unwrap(), Connectivity::Eight);
        assert!(matches!(
            Connectivity::try_from(6),
            Err(SegmentationError::Parameter { name: "connectivity", .. })
        ));
    }

    #[test]
    fn nodes_expose_coordinates_and_color() {
        let image = PixelBuffer::new(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let graph = PixelGraph::build(&image, Connectivity::Four).unwrap();
        let node = graph.node(3);
        assert_eq!((node.row, node.col), (1, 1));
        assert_eq!(node.color, &[4.0]);
    }
}

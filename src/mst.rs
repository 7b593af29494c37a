use crate::disjoint_set::DisjointSet;
use crate::pixel_graph::PixelGraph;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestEdge {
    pub u: usize,
    pub v: usize,
    pub weight: f64,
}

/// Minimum spanning forest of a pixel graph.
///
/// Edges are stored in acceptance order: ascending weight, generation order
/// on ties.
#[derive(Debug, Clone)]
pub struct SpanningForest {
    edges: Vec<ForestEdge>,
    node_count: usize,
    component_count: usize,
}

impl SpanningForest {
    pub fn edges(&self) -> &[ForestEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn component_count(&self) -> usize {
        self.component_count
    }

    pub fn weights(&self) -> impl Iterator<Item = f64> + '_ {
        self.edges.iter().map(|e| e.weight)
    }

    pub fn min_weight(&self) -> Option<f64> {
        self.edges.first().map(|e| e.weight)
    }

    pub fn max_weight(&self) -> Option<f64> {
        self.edges.last().map(|e| e.weight)
    }
}

/// Kruskal over a weighted pixel graph.
///
/// Union decisions depend on every earlier decision, so this stays on one
/// thread.
pub struct MstBuilder;

impl MstBuilder {
    pub fn build(graph: &PixelGraph) -> SpanningForest {
        let edges = graph.edges();
        let node_count = graph.node_count();

        let mut order: Vec<usize> = (0..edges.len()).collect();
        order.sort_unstable_by(|&a, &b| {
            edges[a]
                .weight
                .total_cmp(&edges[b].weight)
                .then(a.cmp(&b))
        });

        let mut set = DisjointSet::new(node_count);
        let mut accepted = Vec::with_capacity(node_count.saturating_sub(1));
        for idx in order {
            let edge = edges[idx];
            if set.union(edge.u, edge.v, edge.weight).is_some() {
                accepted.push(ForestEdge {
                    u: edge.u,
                    v: edge.v,
                    weight: edge.weight,
                });
            }
        }

        let component_count = set.component_count();
        debug_assert_eq!(accepted.len(), node_count - component_count);
        SpanningForest {
            edges: accepted,
            node_count,
            component_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_weights::EdgeWeightModel;
    use crate::pixel_buffer::PixelBuffer;
    use crate::pixel_graph::Connectivity;

    fn weighted_forest(image: &PixelBuffer, connectivity: Connectivity) -> SpanningForest {
        let mut graph = PixelGraph::build(image, connectivity).unwrap();
        EdgeWeightModel::new(1.0, 0.1)
            .unwrap()
            .assign_weights(&mut graph);
        MstBuilder::build(&graph)
    }

    fn noisy_image(width: usize, height: usize) -> PixelBuffer {
        let data = (0..width * height * 3)
            .map(|i| ((i * 37 + 11) % 97) as f32)
            .collect();
        PixelBuffer::new(width, height, 3, data).unwrap()
    }

    #[test]
    fn forest_spans_grid_without_cycles() {
        let image = noisy_image(7, 5);
        for connectivity in [Connectivity::Four, Connectivity::Eight] {
            let forest = weighted_forest(&image, connectivity);
            assert_eq!(forest.component_count(), 1);
            assert_eq!(
                forest.edges().len(),
                forest.node_count() - forest.component_count()
            );

            let mut set = DisjointSet::new(forest.node_count());
            for edge in forest.edges() {
                assert!(
                    set.union(edge.u, edge.v, edge.weight).is_some(),
                    "edge {:?} closes a cycle",
                    edge
                );
            }
        }
    }

    #[test]
    fn accepted_edges_are_sorted() {
        let forest = weighted_forest(&noisy_image(6, 6), Connectivity::Eight);
        let weights: Vec<f64> = forest.weights().collect();
        assert!(weights.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(forest.min_weight(), weights.first().copied());
        assert_eq!(forest.max_weight(), weights.last().copied());
    }

    #[test]
    fn ties_resolve_by_generation_order() {
        let image = PixelBuffer::new(3, 3, 1, vec![0.0; 9]).unwrap();
        let forest = weighted_forest(&image, Connectivity::Four);
        let pairs: Vec<(usize, usize)> = forest.edges().iter().map(|e| (e.u, e.v)).collect();
        assert_eq!(
            pairs,
            vec![(0, 1), (0, 3), (1, 2), (1, 4), (2, 5), (3, 6), (4, 7), (5, 8)]
        );
    }

    #[test]
    fn total_weight_is_minimal_on_small_graph() {
        // 1x3 strip: 0 -- 1 -- 2 with a heavy right edge.
        let image = PixelBuffer::new(3, 1, 1, vec![0.0, 1.0, 10.0]).unwrap();
        let forest = weighted_forest(&image, Connectivity::Four);
        let total: f64 = forest.weights().sum();
        assert!((total - (1.0 + 0.1 + 9.0 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn single_pixel_has_empty_forest() {
        let image = PixelBuffer::new(1, 1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        let forest = weighted_forest(&image, Connectivity::Eight);
        assert!(forest.edges().is_empty());
        assert_eq!(forest.component_count(), 1);
    }

    #[test]
    fn build_is_deterministic() {
        let image = noisy_image(9, 4);
        let a = weighted_forest(&image, Connectivity::Eight);
        let b = weighted_forest(&image, Connectivity::Eight);
        assert_eq!(a.edges(), b.edges());
    }
}

use crate::disjoint_set::DisjointSet;
use crate::pixel_graph::PixelGraph;
use crate::result::{collect_regions, Region};
use crate::threshold::Partition;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};

/// Absorbs regions smaller than a size floor into their closest neighbor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionMerger {
    min_region_size: usize,
    max_merges: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub labels: Vec<u32>,
    pub regions: Vec<Region>,
    /// Merges made by the size-ordered loop and the forced pass together.
    pub merges_performed: usize,
    pub forced_merges: usize,
}

impl MergeOutcome {
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

struct RegionTable {
    set: DisjointSet,
    adjacency: Vec<BTreeSet<usize>>,
}

impl RegionTable {
    fn build(graph: &PixelGraph, partition: &Partition) -> Self {
        let image = graph.image();
        let channels = image.channels();
        let count = partition.region_count();
        let labels = partition.labels();

        let mut sizes = vec![0usize; count];
        let mut color_sums = vec![0.0f64; count * channels];
        for (idx, &label) in labels.iter().enumerate() {
            let l = label as usize;
            sizes[l] += 1;
            for (c, &v) in image.pixel(idx).iter().enumerate() {
                color_sums[l * channels + c] += v as f64;
            }
        }

        let mut adjacency = vec![BTreeSet::new(); count];
        for edge in graph.edges() {
            let a = labels[edge.u] as usize;
            let b = labels[edge.v] as usize;
            if a != b {
                adjacency[a].insert(b);
                adjacency[b].insert(a);
            }
        }

        Self {
            set: DisjointSet::from_aggregates(sizes, color_sums, channels),
            adjacency,
        }
    }

    fn is_live_candidate(&mut self, id: usize, floor: usize) -> bool {
        self.set.find(id) == id && self.set.size_of(id) < floor && !self.adjacency[id].is_empty()
    }

    /// Neighbor with the closest mean color; ties go to the lowest id.
    fn best_neighbor(&mut self, id: usize) -> Option<usize> {
        let own = self.set.mean_color(id);
        let neighbors: Vec<usize> = self.adjacency[id].iter().copied().collect();
        let mut best: Option<(f64, usize)> = None;
        for n in neighbors {
            let distance = mean_distance(&own, &self.set.mean_color(n));
            let better = match best {
                None => true,
                Some((d, b)) => match distance.total_cmp(&d) {
                    Ordering::Less => true,
                    Ordering::Equal => n < b,
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some((distance, n));
            }
        }
        best.map(|(_, n)| n)
    }

    /// Merge `source` into `target`, returning the surviving root.
    fn absorb(&mut self, source: usize, target: usize) -> Option<usize> {
        let root = self.set.union(target, source, 0.0)?;
        let gone = if root == target { source } else { target };

        let moved = std::mem::take(&mut self.adjacency[gone]);
        for n in moved {
            self.adjacency[n].remove(&gone);
            if n != root {
                self.adjacency[n].insert(root);
                self.adjacency[root].insert(n);
            }
        }
        self.adjacency[root].remove(&gone);
        self.adjacency[root].remove(&root);
        Some(root)
    }

    fn sub_floor_roots(&mut self, floor: usize) -> Vec<(usize, usize)> {
        let mut pending = Vec::new();
        for id in 0..self.adjacency.len() {
            if self.is_live_candidate(id, floor) {
                pending.push((self.set.size_of(id), id));
            }
        }
        pending.sort_unstable();
        pending
    }
}

impl RegionMerger {
    /// `min_region_size <= 1` disables merging.
    pub fn new(min_region_size: usize) -> Self {
        Self {
            min_region_size,
            max_merges: None,
        }
    }

    /// Bound the size-ordered merge loop. Once the cap is hit, small regions
    /// are still absorbed, smallest first, until none remains under the floor.
    pub fn with_max_merges(mut self, max_merges: usize) -> Self {
        self.max_merges = Some(max_merges);
        self
    }

    pub fn min_region_size(&self) -> usize {
        self.min_region_size
    }

    pub fn max_merges(&self) -> Option<usize> {
        self.max_merges
    }

    pub fn merge(&self, graph: &PixelGraph, partition: &Partition) -> MergeOutcome {
        let image = graph.image();
        let total_regions = partition.region_count();
        let floor = self.min_region_size;

        if floor <= 1 || total_regions <= 1 {
            let labels = partition.labels().to_vec();
            let regions = collect_regions(image, &labels, total_regions);
            return MergeOutcome {
                labels,
                regions,
                merges_performed: 0,
                forced_merges: 0,
            };
        }

        let mut table = RegionTable::build(graph, partition);
        let cap = (total_regions - 1).min(self.max_merges.unwrap_or(usize::MAX));

        let mut heap = BinaryHeap::new();
        for (size, id) in table.sub_floor_roots(floor) {
            heap.push(Reverse((size, id)));
        }

        let mut merges = 0usize;
        while merges < cap {
            let Some(Reverse((size, id))) = heap.pop() else {
                break;
            };
            // Entries go stale once their region grows or is absorbed.
            if !table.is_live_candidate(id, floor) || table.set.size_of(id) != size {
                continue;
            }
            let Some(target) = table.best_neighbor(id) else {
                continue;
            };
            let Some(root) = table.absorb(id, target) else {
                continue;
            };
            merges += 1;

            let grown = table.set.size_of(root);
            if grown < floor {
                heap.push(Reverse((grown, root)));
            }
        }

        // Past the cap, keep absorbing the smallest region until none is
        // under the floor or only one region is left.
        let mut forced = 0usize;
        if merges >= cap {
            let pending = table.sub_floor_roots(floor).len();
            if pending > 0 {
                log::info!(
                    "Merge cap {} reached with {} regions under {} pixels, forcing merges",
                    cap,
                    pending,
                    floor
                );
            }
            while let Some(&(_, id)) = table.sub_floor_roots(floor).first() {
                let Some(target) = table.best_neighbor(id) else {
                    break;
                };
                if table.absorb(id, target).is_none() {
                    break;
                }
                forced += 1;
            }
        }

        let (region_labels, region_count) = canonical_pixel_labels(&mut table.set, partition.labels());
        let regions = collect_regions(image, &region_labels, region_count);
        log::debug!(
            "Region merge: {} -> {} regions ({} merges, {} forced)",
            total_regions,
            region_count,
            merges + forced,
            forced
        );

        MergeOutcome {
            labels: region_labels,
            regions,
            merges_performed: merges + forced,
            forced_merges: forced,
        }
    }
}

/// Relabel pixels by their merged region, numbering in row-major
/// first-discovery order.
fn canonical_pixel_labels(set: &mut DisjointSet, labels: &[u32]) -> (Vec<u32>, usize) {
    let mut label_of_root = vec![u32::MAX; set.len()];
    let mut next = 0u32;
    let relabeled = labels
        .iter()
        .map(|&label| {
            let root = set.find(label as usize);
            if label_of_root[root] == u32::MAX {
                label_of_root[root] = next;
                next += 1;
            }
            label_of_root[root]
        })
        .collect();
    (relabeled, next as usize)
}

fn mean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_weights::EdgeWeightModel;
    use crate::mst::MstBuilder;
    use crate::pixel_buffer::PixelBuffer;
    use crate::pixel_graph::Connectivity;
    use crate::threshold::ThresholdPartitioner;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn run(image: &PixelBuffer, threshold: f64, merger: RegionMerger) -> (Partition, MergeOutcome) {
        let mut graph = PixelGraph::build(image, Connectivity::Four).unwrap();
        EdgeWeightModel::new(1.0, 0.1)
            .unwrap()
            .assign_weights(&mut graph);
        let forest = MstBuilder::build(&graph);
        let partition = ThresholdPartitioner::cut(image, &forest, threshold);
        let outcome = merger.merge(&graph, &partition);
        (partition, outcome)
    }

    fn assert_contiguous(outcome: &MergeOutcome) {
        for (i, region) in outcome.regions.iter().enumerate() {
            assert_eq!(region.label as usize, i);
            assert!(region.pixel_count > 0);
        }
        assert!(outcome
            .labels
            .iter()
            .all(|&l| (l as usize) < outcome.region_count()));
        let total: usize = outcome.regions.iter().map(|r| r.pixel_count).sum();
        assert_eq!(total, outcome.labels.len());
    }

    #[test]
    fn floor_above_pixel_count_collapses_to_one_region() {
        let data = (0..30).map(|i| (i * 17 % 23) as f32 * 5.0).collect();
        let image = PixelBuffer::new(6, 5, 1, data).unwrap();
        let (partition, outcome) = run(&image, 0.0, RegionMerger::new(1000));
        assert_eq!(partition.region_count(), 30);
        assert_eq!(outcome.region_count(), 1);
        assert_eq!(outcome.merges_performed, 29);
        assert_eq!(outcome.forced_merges, 0);
        assert_contiguous(&outcome);
    }

    #[test]
    fn small_floor_leaves_partition_untouched() {
        let data = (0..12).map(|i| i as f32 * 20.0).collect();
        let image = PixelBuffer::new(4, 3, 1, data).unwrap();
        for floor in [0, 1] {
            let (partition, outcome) = run(&image, 0.0, RegionMerger::new(floor));
            assert_eq!(outcome.labels, partition.labels());
            assert_eq!(outcome.merges_performed, 0);
        }
    }

    #[test]
    fn speck_merges_into_closest_colored_neighbor() {
        // Left half 0, right half 100, one 60-valued speck at (1, 1) inside
        // the left block but color-closer to the right block.
        #[rustfmt::skip]
        let data = vec![
            0.0,  0.0, 100.0, 100.0,
            0.0, 60.0, 100.0, 100.0,
            0.0,  0.0, 100.0, 100.0,
        ];
        let image = PixelBuffer::new(4, 3, 1, data).unwrap();
        let (partition, outcome) = run(&image, 1.0, RegionMerger::new(2));
        assert_eq!(partition.region_count(), 3);
        assert_eq!(outcome.region_count(), 2);
        assert_eq!(outcome.labels, vec![0, 0, 1, 1, 0, 1, 1, 1, 0, 0, 1, 1]);
        assert_eq!(outcome.regions[1].pixel_count, 7);
    }

    #[test]
    fn merge_cap_triggers_forced_pass() {
        let data = (0..9).map(|i| i as f32 * 50.0).collect();
        let image = PixelBuffer::new(3, 3, 1, data).unwrap();
        let (_, outcome) = run(&image, 0.0, RegionMerger::new(2).with_max_merges(1));
        assert!(outcome.forced_merges > 0);
        assert_eq!(outcome.merges_performed, 1 + outcome.forced_merges);
        assert!(outcome.regions.iter().all(|r| r.pixel_count >= 2));
        assert_contiguous(&outcome);
    }

    #[test]
    fn capped_merging_still_reaches_the_floor() {
        let mut rng = StdRng::seed_from_u64(0xf100);
        for case in 0..300 {
            let width = rng.random_range(1..12);
            let height = rng.random_range(1..12);
            let channels = if rng.random_range(0..2) == 0 { 1 } else { 3 };
            let data = (0..width * height * channels)
                .map(|_| rng.random_range(0..6) as f32 * 40.0)
                .collect();
            let image = PixelBuffer::new(width, height, channels, data).unwrap();
            let floor = rng.random_range(2..40);
            let mut merger = RegionMerger::new(floor);
            if rng.random::<f64>() < 0.3 {
                merger = merger.with_max_merges(rng.random_range(0..5));
            }
            let threshold = rng.random::<f64>() * 60.0;

            let (_, outcome) = run(&image, threshold, merger);
            assert_contiguous(&outcome);
            if outcome.region_count() > 1 {
                for region in &outcome.regions {
                    assert!(
                        region.pixel_count >= floor,
                        "case {}: region {} has {} pixels, floor {} ({:?})",
                        case,
                        region.label,
                        region.pixel_count,
                        floor,
                        merger.max_merges()
                    );
                }
            }
        }
    }

    #[test]
    fn merging_is_deterministic() {
        let data = (0..64).map(|i| ((i * 31 + 7) % 41) as f32).collect();
        let image = PixelBuffer::new(8, 8, 1, data).unwrap();
        let (_, a) = run(&image, 3.0, RegionMerger::new(5));
        let (_, b) = run(&image, 3.0, RegionMerger::new(5));
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.regions, b.regions);
        assert!(a.regions.iter().all(|r| r.pixel_count >= 5));
        assert_contiguous(&a);
    }
}

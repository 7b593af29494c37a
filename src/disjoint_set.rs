//! Union-find with path compression and union-by-size.
//!
//! Every root also carries aggregate statistics for its component: the number
//! of elements, the largest edge weight that caused a merge inside it, and the
//! per-channel color sums used to derive a mean color.

use crate::pixel_buffer::PixelBuffer;

#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
    max_weight: Vec<f64>,
    channels: usize,
    color_sum: Vec<f64>,
    components: usize,
}

impl DisjointSet {
    /// `n` singletons without color statistics.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
            max_weight: vec![0.0; n],
            channels: 0,
            color_sum: Vec::new(),
            components: n,
        }
    }

    /// One singleton per pixel, seeded with the pixel's color.
    pub fn from_pixels(image: &PixelBuffer) -> Self {
        let n = image.pixel_count();
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
            max_weight: vec![0.0; n],
            channels: image.channels(),
            color_sum: image.data().iter().map(|&v| v as f64).collect(),
            components: n,
        }
    }

    /// Elements that already stand for groups of pixels.
    ///
    /// `color_sums` holds `channels` sums per element.
    pub fn from_aggregates(sizes: Vec<usize>, color_sums: Vec<f64>, channels: usize) -> Self {
        let n = sizes.len();
        debug_assert_eq!(color_sums.len(), n * channels);
        Self {
            parent: (0..n).collect(),
            size: sizes,
            max_weight: vec![0.0; n],
            channels,
            color_sum: color_sums,
            components: n,
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn component_count(&self) -> usize {
        self.components
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }

        root
    }

    /// Merge the components of `x` and `y` because of an edge of `weight`.
    ///
    /// Returns the surviving root, or `None` if both were already joined.
    pub fn union(&mut self, x: usize, y: usize, weight: f64) -> Option<usize> {
        let mut root = self.find(x);
        let mut child = self.find(y);
        if root == child {
            return None;
        }
        if self.size[root] < self.size[child] {
            std::mem::swap(&mut root, &mut child);
        }

        self.parent[child] = root;
        self.size[root] += self.size[child];
        self.max_weight[root] = self.max_weight[root]
            .max(self.max_weight[child])
            .max(weight);
        if self.channels > 0 {
            let ch = self.channels;
            for c in 0..ch {
                self.color_sum[root * ch + c] += self.color_sum[child * ch + c];
            }
        }
        self.components -= 1;
        Some(root)
    }

    pub fn connected(&mut self, x: usize, y: usize) -> bool {
        self.find(x) == self.find(y)
    }

    pub fn size_of(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    /// Largest merge weight inside `x`'s component (0 for singletons).
    pub fn max_internal_weight(&mut self, x: usize) -> f64 {
        let root = self.find(x);
        self.max_weight[root]
    }

    /// Mean color of `x`'s component; empty when no colors were seeded.
    pub fn mean_color(&mut self, x: usize) -> Vec<f64> {
        let root = self.find(x);
        let ch = self.channels;
        let size = self.size[root] as f64;
        self.color_sum[root * ch..(root + 1) * ch]
            .iter()
            .map(|sum| sum / size)
            .collect()
    }

    /// Sequential labels in order of first discovery during an index scan.
    ///
    /// Returns one label per element and the number of labels.
    pub fn canonical_labels(&mut self) -> (Vec<u32>, usize) {
        let n = self.len();
        let mut label_of_root = vec![u32::MAX; n];
        let mut labels = Vec::with_capacity(n);
        let mut next = 0u32;
        for x in 0..n {
            let root = self.find(x);
            if label_of_root[root] == u32::MAX {
                label_of_root[root] = next;
                next += 1;
            }
            labels.push(label_of_root[root]);
        }
        (labels, next as usize)
    }
}

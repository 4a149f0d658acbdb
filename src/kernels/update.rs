//! Centroid update: per-cluster weighted sums folded on the rayon pool,
//! then one division per cluster. Sums are exact in u64.

use rayon::prelude::*;

use crate::layout::{Centroid, unpack_rgb};

/// Exact per-cluster color sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterSum {
    /// Weighted member count.
    pub count: u64,
    /// Weighted channel sums in 8-bit units.
    pub rgb: [u64; 3],
}

impl ClusterSum {
    fn add(&mut self, packed: u32, weight: u32) {
        let w = u64::from(weight);
        self.count += w;
        for (sum, channel) in self.rgb.iter_mut().zip(unpack_rgb(packed)) {
            *sum += w * u64::from(channel);
        }
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        for (a, b) in self.rgb.iter_mut().zip(other.rgb) {
            *a += b;
        }
    }

    /// `None` for a cluster with no members.
    pub fn mean(&self) -> Option<Centroid> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(self.rgb.map(|sum| (sum as f64 / n) as f32))
    }
}

/// Per-cluster sums of the assigned colors; ids outside `0..k` are skipped.
pub fn cluster_sums(
    colors: &[u32],
    weights: &[u32],
    assignments: &[u32],
    k: usize,
    invocations: usize,
) -> Vec<ClusterSum> {
    let chunk = invocations.max(1);
    colors
        .par_chunks(chunk)
        .zip(weights.par_chunks(chunk))
        .zip(assignments.par_chunks(chunk))
        .fold(
            || vec![ClusterSum::default(); k],
            |mut sums, ((colors, weights), assigned)| {
                for ((&packed, &weight), &cluster) in colors.iter().zip(weights).zip(assigned) {
                    if let Some(sum) = sums.get_mut(cluster as usize) {
                        sum.add(packed, weight);
                    }
                }
                sums
            },
        )
        .reduce(
            || vec![ClusterSum::default(); k],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    x.merge(y);
                }
                a
            },
        )
}

/// Moves every centroid to the mean of its members. Clusters without
/// members keep their previous centroid.
pub fn update(
    colors: &[u32],
    weights: &[u32],
    assignments: &[u32],
    centroids: &mut [Centroid],
    invocations: usize,
) {
    let sums = cluster_sums(colors, weights, assignments, centroids.len(), invocations);
    centroids
        .par_iter_mut()
        .zip(sums.par_iter())
        .for_each(|(centroid, sum)| {
            if let Some(mean) = sum.mean() {
                *centroid = mean;
            }
        });
}

//! Where a quantization runs, and what it returns.

use tracing::{debug, info};

use crate::error::QuantizeError;
use crate::kernels::assign::squared_distance;
use crate::kernels::update::cluster_sums;
use crate::kernels::{assign, box_split, centroid_init, histogram, update};
use crate::layout::{Axis, Centroid, Cube, MomentBin, SIDE_LENGTH, TOTAL_SIZE, unpack_rgb_f32};
use crate::params::Params;
use crate::source::ColorSet;

/// Chunk size of the CPU histogram and size queries.
const CPU_CHUNK: usize = 256;

/// Results read back after the final pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantization {
    /// Final centroid per cluster, 8-bit channel units.
    pub centroids: Vec<Centroid>,
    /// Cluster of every color-set entry.
    pub assignments: Vec<u32>,
    /// Centroids produced by box splitting, before refinement.
    pub initial_centroids: Vec<Centroid>,
    /// Final partition of the level grid.
    pub cubes: Vec<Cube>,
}

impl Quantization {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    /// Weighted member count of every cluster.
    pub fn cluster_sizes(&self, colors: &ColorSet) -> Vec<u64> {
        cluster_sums(colors.colors(), colors.weights(), &self.assignments, self.k(), CPU_CHUNK)
            .iter()
            .map(|sum| sum.count)
            .collect()
    }

    /// Sum of squared distances between every pixel and its centroid.
    pub fn within_cluster_variance(&self, colors: &ColorSet) -> f64 {
        colors
            .colors()
            .iter()
            .zip(colors.weights())
            .zip(&self.assignments)
            .map(|((&packed, &weight), &cluster)| {
                let distance = squared_distance(unpack_rgb_f32(packed), self.centroids[cluster as usize]);
                f64::from(weight) * f64::from(distance)
            })
            .sum()
    }

    /// Cluster of every pixel, in image order.
    pub fn pixel_clusters(&self, colors: &ColorSet) -> Vec<u32> {
        colors.expand(&self.assignments)
    }
}

/// Something that can run the histogram, box split and refinement for one
/// color set.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn quantize(&mut self, colors: &ColorSet, params: &Params) -> Result<Quantization, QuantizeError>;
}

/// Runs every kernel on the rayon pool, in the same order and with the same
/// tie rules as the GPU session.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn quantize(&mut self, colors: &ColorSet, params: &Params) -> Result<Quantization, QuantizeError> {
        params.validate()?;
        if colors.is_empty() {
            return Err(QuantizeError::ZeroDimension);
        }
        let k = params.k as usize;
        let invocations = params.invocations() as usize;

        let mut moments = vec![MomentBin::default(); TOTAL_SIZE];
        histogram::accumulate(colors.colors(), colors.weights(), &mut moments, CPU_CHUNK);
        histogram::prefix_sum(&mut moments);

        let mut cubes = vec![Cube::default(); k];
        cubes[0] = Cube::FULL;
        let mut parents = vec![Cube::FULL; k];
        let mut counter = 0u32;
        let mut variances = vec![0.0f32; k];
        let mut scores = [[0.0f32; SIDE_LENGTH]; 3];
        for _ in 1..k {
            box_split::cube_variances(&moments, &cubes, counter as usize + 1, &mut variances);
            let Some(slot) = box_split::select_cube(&variances) else {
                break;
            };
            for (axis, axis_scores) in Axis::ALL.into_iter().zip(scores.iter_mut()) {
                box_split::cut_variances(&moments, &cubes[slot], axis, axis_scores);
            }
            let cut = box_split::best_cut([scores[0].as_slice(), scores[1].as_slice(), scores[2].as_slice()]);
            box_split::split_cube(&mut cubes, &mut parents, &mut counter, slot, &cut, params.k);
        }
        debug!(splits = counter, k, "box split finished");

        let mut centroids = vec![[0.0f32; 3]; k];
        centroid_init::initial_centroids(&moments, &cubes, &parents, &mut centroids);
        let initial_centroids = centroids.clone();

        let mut assignments = vec![0u32; colors.len()];
        for _ in 0..params.iterations {
            assign::assign(colors.colors(), &centroids, &mut assignments, invocations);
            update::update(colors.colors(), colors.weights(), &assignments, &mut centroids, invocations);
        }
        if params.iterations == 0 {
            assign::assign(colors.colors(), &centroids, &mut assignments, invocations);
        }

        info!(
            backend = self.name(),
            k = params.k,
            iterations = params.iterations,
            entries = colors.len(),
            "quantization finished"
        );
        Ok(Quantization {
            centroids,
            assignments,
            initial_centroids,
            cubes,
        })
    }
}

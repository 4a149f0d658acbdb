//! Initial centroids from the final box partition, read off the prefix
//! moments in level units and converted to 8-bit channel centers.

use rayon::prelude::*;

use super::histogram::box_totals;
use crate::layout::{Centroid, Cube, MomentBin};

/// Center of a level in 8-bit units: level `q` covers `8q..=8q+7`.
#[inline]
pub fn level_to_channel(level: f64) -> f32 {
    (level * 8.0 + 3.5) as f32
}

fn mean_color(totals: &MomentBin) -> Option<Centroid> {
    totals.mean_levels().map(|mean| mean.map(level_to_channel))
}

/// Mean color of each cube. An empty cube takes its parent's mean, and the
/// full-space mean when the parent is empty too.
pub fn initial_centroids(
    moments: &[MomentBin],
    cubes: &[Cube],
    parents: &[Cube],
    centroids: &mut [Centroid],
) {
    let fallback = mean_color(&box_totals(moments, &Cube::FULL)).unwrap_or_default();
    centroids
        .par_iter_mut()
        .zip(cubes.par_iter().zip(parents.par_iter()))
        .for_each(|(centroid, (cube, parent))| {
            *centroid = mean_color(&box_totals(moments, cube))
                .or_else(|| mean_color(&box_totals(moments, parent)))
                .unwrap_or(fallback);
        });
}

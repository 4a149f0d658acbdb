//! Greedy variance-driven partition of the level grid into boxes.
//!
//! One split step is four kernels: rank the active cubes, score every cut
//! plane of the winner, reduce the scores to one cut, and apply it.

use rayon::prelude::*;

use super::histogram::box_totals;
use crate::layout::{Axis, BestCut, Cube, MomentBin};

/// Priority of a non-empty cube whose colors all share one voxel.
pub const FLAT_PRIORITY: f32 = -1.0;
/// Priority of an empty cube; below every cube with content.
pub const EMPTY_PRIORITY: f32 = -2.0;
/// Cubes without an interior plane, inactive slots and invalid cut positions.
/// Must match `UNSPLITTABLE` in `shaders/common.wgsl`.
pub const UNSPLITTABLE: f32 = -3.4e38;

/// Split priority of one cube: its variance when it can usefully be split,
/// otherwise one of the negative sentinels.
pub fn split_priority(moments: &[MomentBin], cube: &Cube) -> f32 {
    if !cube.is_splittable() {
        return UNSPLITTABLE;
    }
    let totals = box_totals(moments, cube);
    if totals.count == 0 {
        return EMPTY_PRIORITY;
    }
    let variance = totals.variance();
    if variance > 0.0 { variance as f32 } else { FLAT_PRIORITY }
}

pub fn cube_variances(moments: &[MomentBin], cubes: &[Cube], active: usize, variances: &mut [f32]) {
    variances
        .par_iter_mut()
        .zip(cubes.par_iter())
        .enumerate()
        .for_each(|(slot, (variance, cube))| {
            *variance = if slot < active {
                split_priority(moments, cube)
            } else {
                UNSPLITTABLE
            };
        });
}

/// Slot with the highest priority, lowest slot on ties.
pub fn select_cube(variances: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (slot, &priority) in variances.iter().enumerate() {
        if priority == UNSPLITTABLE {
            continue;
        }
        match best {
            Some((_, top)) if priority <= top => {}
            _ => best = Some((slot, priority)),
        }
    }
    best.map(|(slot, _)| slot)
}

/// Variance reduction of cutting `cube` at every plane of `axis`.
///
/// Entry `p` scores the halves `(min, p]` and `(p, max]`; positions outside
/// the cube's interior are [`UNSPLITTABLE`].
pub fn cut_variances(moments: &[MomentBin], cube: &Cube, axis: Axis, scores: &mut [f32]) {
    let parent = box_totals(moments, cube);
    let parent_variance = parent.variance();
    let (lo, hi) = cube.bounds(axis);

    scores.par_iter_mut().enumerate().for_each(|(position, score)| {
        let position = position as u32;
        *score = if position > lo && position < hi {
            let lower = box_totals(moments, &cube.with_max(axis, position));
            let upper = parent.wrapping_sub(&lower);
            (parent_variance - lower.variance() - upper.variance()).max(0.0) as f32
        } else {
            UNSPLITTABLE
        };
    });
}

/// Best cut over the three axes; ties go to R before G before B, then to
/// the lower position.
pub fn best_cut(scores: [&[f32]; 3]) -> BestCut {
    let mut best = BestCut::NONE;
    let mut top = UNSPLITTABLE;
    for (axis, axis_scores) in Axis::ALL.into_iter().zip(scores) {
        for (position, &score) in axis_scores.iter().enumerate() {
            if score > top {
                top = score;
                best = BestCut::new(axis, position as u32, score);
            }
        }
    }
    best
}

/// Applies `cut` to slot `target`: the lower half stays, the upper half goes
/// to the next free slot. Returns false when nothing was split.
pub fn split_cube(
    cubes: &mut [Cube],
    parents: &mut [Cube],
    counter: &mut u32,
    target: usize,
    cut: &BestCut,
    total: u32,
) -> bool {
    let Some(axis) = cut.axis() else {
        return false;
    };
    let next = *counter as usize + 1;
    if next >= total as usize || next >= cubes.len() || target >= next {
        return false;
    }
    let cube = cubes[target];
    let (lo, hi) = cube.bounds(axis);
    if cut.position <= lo || cut.position >= hi {
        return false;
    }

    cubes[target] = cube.with_max(axis, cut.position);
    cubes[next] = cube.with_min(axis, cut.position);
    parents[target] = cube;
    parents[next] = cube;
    *counter += 1;
    true
}

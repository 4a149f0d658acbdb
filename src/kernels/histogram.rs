//! Cumulative 3D moment histogram over 5-bit RGB levels.

use rayon::prelude::*;

use crate::layout::{Cube, MomentBin, SIDE_LENGTH, TOTAL_SIZE, unpack_rgb};

const PLANE: usize = SIDE_LENGTH * SIDE_LENGTH;

#[inline]
pub fn bin_index(r: usize, g: usize, b: usize) -> usize {
    (r * SIDE_LENGTH + g) * SIDE_LENGTH + b
}

/// 5-bit level of an 8-bit channel.
#[inline]
pub fn level(channel: u8) -> u32 {
    u32::from(channel >> 3)
}

#[inline]
pub fn levels(packed: u32) -> [u32; 3] {
    unpack_rgb(packed).map(level)
}

/// Moments of `weight` copies of the voxel at `[r, g, b]` levels.
#[inline]
fn voxel_moments([r, g, b]: [u32; 3], weight: u32) -> MomentBin {
    MomentBin {
        count: weight,
        r: weight.wrapping_mul(r),
        g: weight.wrapping_mul(g),
        b: weight.wrapping_mul(b),
        sum_squares: weight.wrapping_mul(r * r + g * g + b * b),
    }
}

/// Adds every weighted color into its (non-cumulative) bin.
///
/// Workers fill private histograms that are merged afterwards; wrapping sums
/// commute, so the result does not depend on scheduling.
pub fn accumulate(colors: &[u32], weights: &[u32], moments: &mut [MomentBin], invocations: usize) {
    let chunk = invocations.max(1);
    let merged = colors
        .par_chunks(chunk)
        .zip(weights.par_chunks(chunk))
        .fold(
            || vec![MomentBin::default(); TOTAL_SIZE],
            |mut hist, (colors, weights)| {
                for (&packed, &weight) in colors.iter().zip(weights) {
                    let [r, g, b] = levels(packed);
                    let bin = &mut hist[bin_index(r as usize + 1, g as usize + 1, b as usize + 1)];
                    *bin = bin.wrapping_add(&voxel_moments([r, g, b], weight));
                }
                hist
            },
        )
        .reduce(
            || vec![MomentBin::default(); TOTAL_SIZE],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x = x.wrapping_add(y);
                }
                a
            },
        );
    for (dst, src) in moments.iter_mut().zip(&merged) {
        *dst = dst.wrapping_add(src);
    }
}

/// In-place inclusive prefix sum along b, then g, then r.
pub fn prefix_sum(moments: &mut [MomentBin]) {
    moments.par_chunks_mut(SIDE_LENGTH).for_each(|line| {
        for b in 1..SIDE_LENGTH {
            line[b] = line[b].wrapping_add(&line[b - 1]);
        }
    });

    moments.par_chunks_mut(PLANE).for_each(|plane| {
        for g in 1..SIDE_LENGTH {
            let (before, rest) = plane.split_at_mut(g * SIDE_LENGTH);
            let previous = &before[(g - 1) * SIDE_LENGTH..];
            for (cell, prev) in rest[..SIDE_LENGTH].iter_mut().zip(previous) {
                *cell = cell.wrapping_add(prev);
            }
        }
    });

    for r in 1..SIDE_LENGTH {
        let (before, rest) = moments.split_at_mut(r * PLANE);
        let previous = &before[(r - 1) * PLANE..];
        rest[..PLANE]
            .par_iter_mut()
            .zip(previous.par_iter())
            .for_each(|(cell, prev)| *cell = cell.wrapping_add(prev));
    }
}

/// Totals of `cube` from a cumulative histogram via its 8 corners.
pub fn box_totals(moments: &[MomentBin], cube: &Cube) -> MomentBin {
    let at = |r: u32, g: u32, b: u32| moments[bin_index(r as usize, g as usize, b as usize)];
    let (r0, r1) = (cube.r_min, cube.r_max);
    let (g0, g1) = (cube.g_min, cube.g_max);
    let (b0, b1) = (cube.b_min, cube.b_max);

    at(r1, g1, b1)
        .wrapping_sub(&at(r1, g1, b0))
        .wrapping_sub(&at(r1, g0, b1))
        .wrapping_add(&at(r1, g0, b0))
        .wrapping_sub(&at(r0, g1, b1))
        .wrapping_add(&at(r0, g1, b0))
        .wrapping_add(&at(r0, g0, b1))
        .wrapping_sub(&at(r0, g0, b0))
}

/// Largest total any 32-bit accumulator reaches over `entries` of
/// `(packed color, weight)`: the five full-space moments and the 8-bit
/// channel sums the centroid update adds up.
///
/// Wrapping bins are exact for every sub-box as long as this fits in `u32`,
/// since no sub-box or cluster total can exceed the full-space one.
pub fn peak_total(entries: impl IntoIterator<Item = (u32, u32)>) -> u64 {
    let mut totals = [0u64; 8];
    for (packed, weight) in entries {
        let w = u64::from(weight);
        let [r, g, b] = levels(packed).map(u64::from);
        let [r8, g8, b8] = unpack_rgb(packed).map(u64::from);
        totals[0] += w;
        totals[1] += w * r;
        totals[2] += w * g;
        totals[3] += w * b;
        totals[4] += w * (r * r + g * g + b * b);
        totals[5] += w * r8;
        totals[6] += w * g8;
        totals[7] += w * b8;
    }
    totals.into_iter().max().unwrap_or(0)
}

/// Whether [`peak_total`] of `entries` fits the 32-bit bins.
pub fn fits_u32(entries: impl IntoIterator<Item = (u32, u32)>) -> bool {
    peak_total(entries) <= u64::from(u32::MAX)
}

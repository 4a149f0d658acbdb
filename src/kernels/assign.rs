//! Nearest-centroid assignment by squared RGB distance.

use rayon::prelude::*;

use crate::layout::{Centroid, unpack_rgb_f32};

/// Squared Euclidean distance in 8-bit channel units.
#[inline]
pub fn squared_distance(a: [f32; 3], b: Centroid) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// Index of the closest centroid, lowest index on ties.
pub fn nearest_centroid(color: [f32; 3], centroids: &[Centroid]) -> u32 {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (index, &centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(color, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = index;
        }
    }
    best as u32
}

/// Writes the nearest centroid of every color, one workgroup of
/// `invocations` colors per task.
pub fn assign(colors: &[u32], centroids: &[Centroid], assignments: &mut [u32], invocations: usize) {
    let chunk = invocations.max(1);
    assignments
        .par_chunks_mut(chunk)
        .zip(colors.par_chunks(chunk))
        .for_each(|(out, colors)| {
            for (slot, &packed) in out.iter_mut().zip(colors) {
                *slot = nearest_centroid(unpack_rgb_f32(packed), centroids);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::pack_rgba;

    #[test]
    fn test_ties_go_to_lowest_index() {
        let centroids = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [5.0, 0.0, 0.0]];
        // Equidistant from 0 and 2.
        assert_eq!(nearest_centroid([2.5, 0.0, 0.0], &centroids), 0);
        assert_eq!(nearest_centroid([5.0, 1.0, 0.0], &centroids), 2);
        let duplicated = [[7.0, 7.0, 7.0]; 4];
        assert_eq!(nearest_centroid([0.0, 0.0, 0.0], &duplicated), 0);
    }

    #[test]
    fn test_assign_is_idempotent() {
        let colors: Vec<u32> = (0..1000u32)
            .map(|i| pack_rgba((i * 7) as u8, (i * 13) as u8, (i * 31) as u8, 255))
            .collect();
        let centroids = [[20.0, 40.0, 60.0], [200.0, 10.0, 90.0], [128.0, 128.0, 128.0]];
        let mut first = vec![0; colors.len()];
        let mut second = vec![u32::MAX; colors.len()];
        assign(&colors, &centroids, &mut first, 64);
        assign(&colors, &centroids, &mut second, 7);
        assert_eq!(first, second);
        assert!(first.iter().all(|&c| c < 3));
    }
}

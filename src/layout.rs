//! Byte layouts shared between the host and the compute kernels.
//!
//! Every type here is `Pod` so a device buffer can be viewed as a slice of it
//! without copying. Field order is part of the contract.

use bytemuck::{Pod, Zeroable};

/// Quantization levels per channel (5 bits).
pub const LEVELS: usize = 32;
/// Histogram side: one zero padding plane plus the levels.
pub const SIDE_LENGTH: usize = LEVELS + 1;
pub const TOTAL_SIZE: usize = SIDE_LENGTH * SIDE_LENGTH * SIDE_LENGTH;
/// Largest supported cluster count.
pub const MAX_CLUSTERS: u32 = 256;

/// RGB centroid in 8-bit channel units.
pub type Centroid = [f32; 3];

/// Cumulative moments of one histogram bin.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MomentBin {
    pub count: u32,
    pub r: u32,
    pub g: u32,
    pub b: u32,
    pub sum_squares: u32,
}

impl MomentBin {
    #[inline]
    pub fn wrapping_add(&self, other: &Self) -> Self {
        Self {
            count: self.count.wrapping_add(other.count),
            r: self.r.wrapping_add(other.r),
            g: self.g.wrapping_add(other.g),
            b: self.b.wrapping_add(other.b),
            sum_squares: self.sum_squares.wrapping_add(other.sum_squares),
        }
    }

    #[inline]
    pub fn wrapping_sub(&self, other: &Self) -> Self {
        Self {
            count: self.count.wrapping_sub(other.count),
            r: self.r.wrapping_sub(other.r),
            g: self.g.wrapping_sub(other.g),
            b: self.b.wrapping_sub(other.b),
            sum_squares: self.sum_squares.wrapping_sub(other.sum_squares),
        }
    }

    /// Sum of squared deviations from the mean, in level units.
    ///
    /// Computed as `(n * sum_squares - |sum|^2) / n` with the numerator in
    /// 128-bit integers, so a box holding a single color is exactly zero.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = u128::from(self.count);
        let squared_sums: u128 = [self.r, self.g, self.b]
            .iter()
            .map(|&s| u128::from(s) * u128::from(s))
            .sum();
        let scaled = (n * u128::from(self.sum_squares)).saturating_sub(squared_sums);
        scaled as f64 / f64::from(self.count)
    }

    /// Mean level per channel, `None` for an empty region.
    pub fn mean_levels(&self) -> Option<[f64; 3]> {
        if self.count == 0 {
            return None;
        }
        let n = f64::from(self.count);
        Some([
            f64::from(self.r) / n,
            f64::from(self.g) / n,
            f64::from(self.b) / n,
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    R,
    G,
    B,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::R, Axis::G, Axis::B];

    pub fn index(self) -> u32 {
        match self {
            Axis::R => 0,
            Axis::G => 1,
            Axis::B => 2,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// Axis-aligned box in padded grid coordinates: `min` exclusive, `max` inclusive.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Cube {
    pub r_min: u32,
    pub r_max: u32,
    pub g_min: u32,
    pub g_max: u32,
    pub b_min: u32,
    pub b_max: u32,
}

impl Cube {
    pub const FULL: Cube = Cube {
        r_min: 0,
        r_max: LEVELS as u32,
        g_min: 0,
        g_max: LEVELS as u32,
        b_min: 0,
        b_max: LEVELS as u32,
    };

    pub fn bounds(&self, axis: Axis) -> (u32, u32) {
        match axis {
            Axis::R => (self.r_min, self.r_max),
            Axis::G => (self.g_min, self.g_max),
            Axis::B => (self.b_min, self.b_max),
        }
    }

    /// Lower half of a cut at `position`.
    pub fn with_max(mut self, axis: Axis, position: u32) -> Self {
        match axis {
            Axis::R => self.r_max = position,
            Axis::G => self.g_max = position,
            Axis::B => self.b_max = position,
        }
        self
    }

    /// Upper half of a cut at `position`.
    pub fn with_min(mut self, axis: Axis, position: u32) -> Self {
        match axis {
            Axis::R => self.r_min = position,
            Axis::G => self.g_min = position,
            Axis::B => self.b_min = position,
        }
        self
    }

    /// Whether the voxel at quantized levels `(r, g, b)` lies inside.
    pub fn contains_levels(&self, r: u32, g: u32, b: u32) -> bool {
        let inside = |v: u32, (lo, hi): (u32, u32)| lo < v + 1 && v < hi;
        inside(r, self.bounds(Axis::R))
            && inside(g, self.bounds(Axis::G))
            && inside(b, self.bounds(Axis::B))
    }

    /// True when at least one axis has an interior cut plane.
    pub fn is_splittable(&self) -> bool {
        Axis::ALL.iter().any(|&axis| {
            let (lo, hi) = self.bounds(axis);
            hi > lo + 1
        })
    }
}

/// Winner of the cut search; `reduction_bits` holds a non-negative `f32`
/// whose bit pattern orders the same way as the value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BestCut {
    pub axis: u32,
    pub position: u32,
    pub reduction_bits: u32,
}

impl BestCut {
    pub const NONE: BestCut = BestCut {
        axis: u32::MAX,
        position: 0,
        reduction_bits: 0,
    };

    pub fn new(axis: Axis, position: u32, reduction: f32) -> Self {
        Self {
            axis: axis.index(),
            position,
            reduction_bits: reduction.max(0.0).to_bits(),
        }
    }

    pub fn axis(&self) -> Option<Axis> {
        Axis::from_index(self.axis)
    }

    pub fn reduction(&self) -> f32 {
        f32::from_bits(self.reduction_bits)
    }
}

/// Invocation grid of the assign kernel, bound as a uniform.
///
/// `linear` is non-zero when entries are addressed as one folded line
/// rather than as the `width`×`height` image plane.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AssignExtent {
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub linear: u32,
}

/// Packs a color the way `unpack4x8unorm` reads it.
#[inline]
pub fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

#[inline]
pub fn unpack_rgb(packed: u32) -> [u8; 3] {
    let [r, g, b, _] = packed.to_le_bytes();
    [r, g, b]
}

#[inline]
pub fn unpack_rgb_f32(packed: u32) -> [f32; 3] {
    unpack_rgb(packed).map(f32::from)
}

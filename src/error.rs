//! Error type shared by the library, the wasm wrapper and the CLI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuantizeError {
    #[error("unable to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch {
        len: usize,
        width: u32,
        height: u32,
    },

    #[error("cluster count must be between 1 and {max}, got {k}")]
    InvalidClusterCount { k: u32, max: u32 },

    #[error("workgroup size {0:?} must be non-zero with at most 256 invocations")]
    InvalidWorkgroupSize([u32; 2]),

    /// Only reachable when a [`crate::ColorSet`] is built directly; the
    /// byte entry points shrink the image first.
    #[error("moment totals of {entries} colors overflow 32-bit bins; downscale the image")]
    MomentOverflow { entries: usize },

    #[error("invalid params: {0}")]
    Params(#[from] serde_json::Error),

    // ------------------------------------------------------------
    // GPU
    // ------------------------------------------------------------
    #[error("no usable GPU adapter: {0}")]
    NoAdapter(String),

    #[error("GPU rejected the work: {0}")]
    Gpu(String),

    #[error("buffer readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("buffer readback was dropped before completing")]
    ReadbackCanceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

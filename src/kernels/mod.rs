//! Compute kernels as pure functions over their buffer contracts.
//!
//! These are the CPU counterparts of the WGSL kernels in `src/shaders/`.
//! [`crate::backend::CpuBackend`] chains them in the same order the GPU
//! session records its passes, and the tests use them as the reference.

pub mod assign;
pub mod box_split;
pub mod centroid_init;
pub mod histogram;
pub mod update;

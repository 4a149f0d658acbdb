//! Session parameters: cluster count, refinement rounds, assign workgroup
//! shape and the optional downscale, loadable from camelCase JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QuantizeError;
use crate::layout::MAX_CLUSTERS;

/// Largest number of invocations in one workgroup.
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 256;

/// What the assignment buffer is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignMode {
    /// One entry per pixel.
    #[default]
    Pixels,
    /// One entry per distinct RGB color, weighted by how often it occurs.
    UniqueColors,
}

/// Session configuration.
///
/// Loaded from camelCase JSON; every field is optional:
///
/// ```json
/// { "k": 16, "iterations": 20, "workgroupSize": [16, 16], "mode": "uniqueColors" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Params {
    /// Number of clusters (1..=256).
    pub k: u32,
    /// Assign/update rounds after initialization.
    pub iterations: u32,
    /// Assign pass workgroup size over the image plane.
    pub workgroup_size: [u32; 2],
    pub mode: AssignMode,
    /// Resize so the longest side equals this before clustering.
    pub downscale: Option<u32>,
    /// Source image used when the caller names none.
    pub img_path: Option<PathBuf>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            k: 8,
            iterations: 10,
            workgroup_size: [8, 8],
            mode: AssignMode::Pixels,
            downscale: None,
            img_path: None,
        }
    }
}

impl Params {
    /// Eight clusters, ten rounds, 8x8 assign workgroups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates; unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self, QuantizeError> {
        let params: Params = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self, QuantizeError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    // ------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------

    pub fn with_k(mut self, k: u32) -> Self {
        self.k = k;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_workgroup_size(mut self, workgroup_size: [u32; 2]) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    pub fn with_mode(mut self, mode: AssignMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_downscale(mut self, downscale: Option<u32>) -> Self {
        self.downscale = downscale;
        self
    }

    /// Checks every bound a session relies on before any buffer is
    /// created.
    pub fn validate(&self) -> Result<(), QuantizeError> {
        if self.k == 0 || self.k > MAX_CLUSTERS {
            return Err(QuantizeError::InvalidClusterCount {
                k: self.k,
                max: MAX_CLUSTERS,
            });
        }
        let [x, y] = self.workgroup_size;
        if x == 0 || y == 0 || u64::from(x) * u64::from(y) > u64::from(MAX_WORKGROUP_INVOCATIONS) {
            return Err(QuantizeError::InvalidWorkgroupSize(self.workgroup_size));
        }
        if self.downscale == Some(0) {
            return Err(QuantizeError::ZeroDimension);
        }
        Ok(())
    }

    /// Invocations in one assign workgroup.
    pub fn invocations(&self) -> u32 {
        self.workgroup_size[0] * self.workgroup_size[1]
    }
}

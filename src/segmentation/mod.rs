//! Marker-controlled watershed segmentation of discretized SDF images.
//!
//! A [`Segmenter`] turns the discretized field (dark basins in the deep
//! interior and far exterior, a bright ridge along the surface) into a label
//! volume of the same shape. Two implementations ship with the crate:
//!
//! - [`WatershedSegmenter`]: in-process h-minima markers plus priority flood
//! - [`ExternalSegmenter`]: runs an out-of-process tool over NIfTI files with
//!   a bounded timeout

mod external;
mod watershed;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::{LabelVolume, NiftiError, VolumetricField};

pub use external::ExternalSegmenter;
pub use watershed::WatershedSegmenter;

/// Voxel neighbourhood used for minima detection and flooding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Face neighbours.
    #[default]
    #[serde(rename = "6")]
    Six,
    /// Face, edge and corner neighbours.
    #[serde(rename = "26")]
    TwentySix,
}

impl Connectivity {
    pub fn as_u32(self) -> u32 {
        match self {
            Connectivity::Six => 6,
            Connectivity::TwentySix => 26,
        }
    }

    /// Neighbour offsets `(dx, dy, dz)`.
    pub(crate) fn offsets(self) -> &'static [[i32; 3]] {
        const SIX: [[i32; 3]; 6] = [
            [-1, 0, 0],
            [1, 0, 0],
            [0, -1, 0],
            [0, 1, 0],
            [0, 0, -1],
            [0, 0, 1],
        ];
        const TWENTY_SIX: [[i32; 3]; 26] = {
            let mut out = [[0i32; 3]; 26];
            let mut n = 0;
            let mut i = 0;
            while i < 27 {
                let d = [(i / 9) as i32 - 1, ((i / 3) % 3) as i32 - 1, (i % 3) as i32 - 1];
                if !(d[0] == 0 && d[1] == 0 && d[2] == 0) {
                    out[n] = d;
                    n += 1;
                }
                i += 1;
            }
            out
        };
        match self {
            Connectivity::Six => &SIX,
            Connectivity::TwentySix => &TWENTY_SIX,
        }
    }
}

/// Watershed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatershedParams {
    /// Gradient radius, forwarded to external tools.
    pub radius: u32,
    /// Minimum depth (in image units) for a basin to get its own marker.
    pub tolerance: f32,
    pub connectivity: Connectivity,
    /// Label voxels where two basins meet with 0.
    pub dams: bool,
}

impl Default for WatershedParams {
    fn default() -> Self {
        Self {
            radius: 2,
            tolerance: 3.0,
            connectivity: Connectivity::Six,
            dams: true,
        }
    }
}

/// Failures of the segmentation capability.
///
/// These abort one fracture attempt; the orchestrator treats them as "no
/// fragments".
#[derive(Error, Debug)]
pub enum SegmentationBackendError {
    #[error("segmentation backend `{program}` not found")]
    Missing { program: String },

    #[error("segmentation backend timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("segmentation backend exited with status {code:?} (log: {log:?})")]
    Failed { code: Option<i32>, log: PathBuf },

    #[error("segmentation returned a {actual}^3 volume for a {expected}^3 image")]
    ResolutionMismatch { expected: usize, actual: usize },

    #[error("invalid segmentation input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nifti(#[from] NiftiError),
}

/// A watershed segmentation capability.
pub trait Segmenter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Label `image`; the result has the image's resolution.
    fn segment(
        &self,
        image: &VolumetricField,
        params: &WatershedParams,
    ) -> Result<LabelVolume, SegmentationBackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(Connectivity::Six.offsets().len(), 6);
        let all = Connectivity::TwentySix.offsets();
        assert_eq!(all.len(), 26);
        assert!(!all.contains(&[0, 0, 0]));
        assert!(all.contains(&[1, -1, 1]));
    }

    #[test]
    fn test_params_from_json() {
        let params: WatershedParams =
            serde_json::from_str(r#"{"tolerance": 5.0, "connectivity": "26"}"#).unwrap();
        assert_eq!(params.tolerance, 5.0);
        assert_eq!(params.connectivity, Connectivity::TwentySix);
        assert_eq!(params.radius, 2);
        assert!(params.dams);
    }
}

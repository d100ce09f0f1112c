//! Learned fracture model: impact encoder, codebook and voxel decoder.
//!
//! A [`QuantizedLatentDecoder`] maps an impact `(position, direction,
//! impulse)` to a [`VolumetricField`](crate::field::VolumetricField):
//!
//! 1. [`SirenEncoder`] turns the impact into a latent code
//! 2. [`Codebook`] snaps `[latent, style]` to the nearest learned row
//! 3. [`VoxelDecoder`] expands the row into a dense SDF grid
//!
//! Weights come from versioned JSON artifacts (see [`artifact`]). Inference
//! is deterministic: no randomness anywhere on this path.

pub mod artifact;
mod codebook;
mod decoder;
mod encoder;
mod quantized;
mod registry;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use artifact::{
    ConvBlockArtifact, DecoderArtifact, EncoderArtifact, Tensor, CURRENT_FORMAT_VERSION,
};
pub use codebook::{Codebook, CodebookSlice, QuantizedEntry};
pub use decoder::VoxelDecoder;
pub use encoder::{SirenEncoder, SLOT_WIDTH};
pub use quantized::{Decoded, QuantizedLatentDecoder};
pub use registry::ModelRegistry;

/// Output resolution class of a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fidelity {
    /// Half the decoder's native size, downsampled from a `Mid` decode.
    Low,
    /// The decoder's native size.
    #[default]
    Mid,
    /// Twice the native size, through the extra upsampling head.
    High,
}

impl Fidelity {
    /// Grid resolution for a decoder whose native size is `data_shape`.
    pub fn resolution(self, data_shape: usize) -> usize {
        match self {
            Fidelity::Low => data_shape / 2,
            Fidelity::Mid => data_shape,
            Fidelity::High => data_shape * 2,
        }
    }
}

impl fmt::Display for Fidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fidelity::Low => "low",
            Fidelity::Mid => "mid",
            Fidelity::High => "high",
        })
    }
}

impl FromStr for Fidelity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "0" => Ok(Fidelity::Low),
            "mid" | "middle" | "1" => Ok(Fidelity::Mid),
            "high" | "big" | "2" => Ok(Fidelity::High),
            other => Err(format!("unknown fidelity `{}` (expected low, mid or high)", other)),
        }
    }
}

/// Name of a trained shape, e.g. `squirrel`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(pub String);

impl ShapeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Model artifacts could not be loaded. Fatal at startup.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model artifact not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: unsupported artifact format version {version}")]
    UnsupportedVersion { path: PathBuf, version: u64 },

    #[error("tensor `{name}`: {message}")]
    Tensor { name: String, message: String },

    #[error("inconsistent model: {0}")]
    Inconsistent(String),

    #[error("no model loaded for shape `{0}`")]
    UnknownShape(ShapeId),
}

/// An input vector has the wrong length. A programming error at the call
/// site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what}: expected {expected} values, got {actual}")]
pub struct ShapeMismatchError {
    pub what: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl ShapeMismatchError {
    pub(crate) fn check(what: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self {
                what,
                expected,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fidelity_resolution() {
        assert_eq!(Fidelity::Low.resolution(128), 64);
        assert_eq!(Fidelity::Mid.resolution(128), 128);
        assert_eq!(Fidelity::High.resolution(128), 256);
    }

    #[test]
    fn test_fidelity_parse() {
        assert_eq!("HIGH".parse::<Fidelity>().unwrap(), Fidelity::High);
        assert_eq!("1".parse::<Fidelity>().unwrap(), Fidelity::Mid);
        assert!("huge".parse::<Fidelity>().is_err());
        let f: Fidelity = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(f, Fidelity::Low);
    }

    #[test]
    fn test_shape_mismatch_check() {
        assert!(ShapeMismatchError::check("pos", 3, 3).is_ok());
        let err = ShapeMismatchError::check("pos", 3, 2).unwrap_err();
        assert_eq!(err.to_string(), "pos: expected 3 values, got 2");
    }
}

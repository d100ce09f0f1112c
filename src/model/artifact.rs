//! Versioned model artifacts.
//!
//! Each trained shape has two JSON files:
//!
//! ```text
//! {model_dir}/{shape}/{shape}-encoder.json
//! {model_dir}/{shape}/{shape}-decoder.json
//! ```
//!
//! Files carry a `format_version`. Older versions are upgraded in memory
//! through a small table of upgrade steps before deserialisation:
//!
//! | from | to | change |
//! |------|----|--------|
//! | 1 | 2 | encoder: `w0` defaults to 1.0 |
//! | 1 | 2 | decoder: `cookbook` renamed to `codebook`, `batch_norm_eps` defaults to 0.8, `shape_slices` defaults to empty |
//!
//! A file without `format_version` is version 1.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ModelLoadError, ShapeId};

pub const CURRENT_FORMAT_VERSION: u64 = 2;

/// Batch-norm epsilon of version-1 decoders.
const LEGACY_BATCH_NORM_EPS: f64 = 0.8;

/// A dense row-major tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the declared shape against `expected` and the data length
    /// against the declared shape.
    pub(crate) fn expect_shape(&self, name: &str, expected: &[usize]) -> Result<(), ModelLoadError> {
        if self.shape != expected {
            return Err(ModelLoadError::Tensor {
                name: name.to_string(),
                message: format!("expected shape {:?}, found {:?}", expected, self.shape),
            });
        }
        let len: usize = self.shape.iter().product();
        if self.data.len() != len {
            return Err(ModelLoadError::Tensor {
                name: name.to_string(),
                message: format!("shape {:?} needs {} values, found {}", self.shape, len, self.data.len()),
            });
        }
        Ok(())
    }

    /// Shape of a rank-2 tensor.
    pub(crate) fn matrix_dims(&self, name: &str) -> Result<(usize, usize), ModelLoadError> {
        match self.shape.as_slice() {
            &[rows, cols] => {
                self.expect_shape(name, &[rows, cols])?;
                Ok((rows, cols))
            }
            other => Err(ModelLoadError::Tensor {
                name: name.to_string(),
                message: format!("expected a matrix, found shape {:?}", other),
            }),
        }
    }
}

/// SIREN encoder weights: `sin(w0 * (weight @ x + bias))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderArtifact {
    pub format_version: u64,
    pub w0: f32,
    /// `[latent_dim, 7 * slots]`
    pub weight: Tensor,
    /// `[latent_dim]`
    pub bias: Tensor,
}

/// One `ConvTranspose3d + BatchNorm3d + LeakyReLU` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvBlockArtifact {
    /// `[in, out, 4, 4, 4]`
    pub weight: Tensor,
    /// `[out]`
    pub bias: Tensor,
    pub bn_weight: Tensor,
    pub bn_bias: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
}

/// Voxel decoder weights plus the codebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderArtifact {
    pub format_version: u64,
    /// Native output resolution `S` (a multiple of 16).
    pub data_shape: usize,
    /// Base channel count.
    pub ndf: usize,
    /// `[ndf * 8 * (S/16)^3, code_dim]`
    pub fc_weight: Tensor,
    pub fc_bias: Tensor,
    /// Three blocks: `8ndf -> 4ndf -> 2ndf -> ndf`.
    pub blocks: Vec<ConvBlockArtifact>,
    /// `[ndf, 1, 4, 4, 4]`, no bias.
    pub mid_head: Tensor,
    /// `ndf -> ndf / 2`.
    pub high_block: ConvBlockArtifact,
    /// `[ndf / 2, 1, 4, 4, 4]`, no bias.
    pub high_head: Tensor,
    /// `[rows, latent_dim + style_dim]`
    pub codebook: Tensor,
    pub batch_norm_eps: f32,
    /// Codebook rows reserved per shape, as `[start, end)`.
    #[serde(default)]
    pub shape_slices: BTreeMap<String, [usize; 2]>,
}

type Upgrade = fn(&mut Map<String, Value>) -> Result<(), String>;

const ENCODER_UPGRADES: &[(u64, Upgrade)] = &[(1, encoder_v1_to_v2)];
const DECODER_UPGRADES: &[(u64, Upgrade)] = &[(1, decoder_v1_to_v2)];

fn encoder_v1_to_v2(map: &mut Map<String, Value>) -> Result<(), String> {
    map.entry("w0").or_insert(Value::from(1.0));
    Ok(())
}

fn decoder_v1_to_v2(map: &mut Map<String, Value>) -> Result<(), String> {
    if !map.contains_key("codebook") {
        let legacy = map
            .remove("cookbook")
            .ok_or_else(|| "version 1 decoder has no `cookbook`".to_string())?;
        map.insert("codebook".into(), legacy);
    }
    map.entry("batch_norm_eps")
        .or_insert(Value::from(LEGACY_BATCH_NORM_EPS));
    map.entry("shape_slices")
        .or_insert(Value::Object(Map::new()));
    Ok(())
}

fn load_versioned<T: DeserializeOwned>(
    path: &Path,
    upgrades: &[(u64, Upgrade)],
) -> Result<T, ModelLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ModelLoadError::Missing(path.to_path_buf())
        } else {
            ModelLoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let json_err = |source| ModelLoadError::Json {
        path: path.to_path_buf(),
        source,
    };

    let mut map: Map<String, Value> = serde_json::from_str(&text).map_err(json_err)?;
    let mut version = map
        .get("format_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let unsupported = |version| ModelLoadError::UnsupportedVersion {
        path: path.to_path_buf(),
        version,
    };

    while version < CURRENT_FORMAT_VERSION {
        let (_, upgrade) = upgrades
            .iter()
            .find(|(from, _)| *from == version)
            .ok_or_else(|| unsupported(version))?;
        upgrade(&mut map).map_err(|m| {
            ModelLoadError::Inconsistent(format!("{}: {}", path.display(), m))
        })?;
        tracing::debug!(path = %path.display(), from = version, "Upgraded model artifact");
        version += 1;
    }
    if version != CURRENT_FORMAT_VERSION {
        return Err(unsupported(version));
    }
    map.insert("format_version".into(), Value::from(version));

    serde_json::from_value(Value::Object(map)).map_err(json_err)
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(std::fs::File::create(path)?);
    serde_json::to_writer(&mut w, value)?;
    w.flush()
}

impl EncoderArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        load_versioned(path.as_ref(), ENCODER_UPGRADES)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        save_json(self, path.as_ref())
    }
}

impl DecoderArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        load_versioned(path.as_ref(), DECODER_UPGRADES)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        save_json(self, path.as_ref())
    }
}

/// `{model_dir}/{shape}/{shape}-encoder.json`
pub fn encoder_path(model_dir: &Path, shape: &ShapeId) -> PathBuf {
    model_dir
        .join(shape.as_str())
        .join(format!("{}-encoder.json", shape))
}

/// `{model_dir}/{shape}/{shape}-decoder.json`
pub fn decoder_path(model_dir: &Path, shape: &ShapeId) -> PathBuf {
    model_dir
        .join(shape.as_str())
        .join(format!("{}-decoder.json", shape))
}

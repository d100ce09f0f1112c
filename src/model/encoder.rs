use super::{EncoderArtifact, ModelLoadError, ShapeMismatchError};

/// Values per impact slot: position (3), direction (3), impulse (1).
pub const SLOT_WIDTH: usize = 7;

/// Single SIREN layer mapping impact slots to a latent code.
#[derive(Debug, Clone)]
pub struct SirenEncoder {
    /// Row-major `[out_dim, in_dim]`.
    weight: Vec<f32>,
    bias: Vec<f32>,
    in_dim: usize,
    out_dim: usize,
    w0: f32,
}

impl SirenEncoder {
    pub fn from_artifact(artifact: &EncoderArtifact) -> Result<Self, ModelLoadError> {
        let (out_dim, in_dim) = artifact.weight.matrix_dims("encoder.weight")?;
        artifact.bias.expect_shape("encoder.bias", &[out_dim])?;
        if in_dim == 0 || in_dim % SLOT_WIDTH != 0 {
            return Err(ModelLoadError::Inconsistent(format!(
                "encoder input width {} is not a positive multiple of {}",
                in_dim, SLOT_WIDTH
            )));
        }
        if !artifact.w0.is_finite() {
            return Err(ModelLoadError::Inconsistent(format!(
                "encoder w0 must be finite, got {}",
                artifact.w0
            )));
        }
        Ok(Self {
            weight: artifact.weight.data.clone(),
            bias: artifact.bias.data.clone(),
            in_dim,
            out_dim,
            w0: artifact.w0,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Number of impact slots the encoder was trained with.
    pub fn slots(&self) -> usize {
        self.in_dim / SLOT_WIDTH
    }

    /// `sin(w0 * (W x + b))`
    pub fn encode(&self, input: &[f32]) -> Result<Vec<f32>, ShapeMismatchError> {
        ShapeMismatchError::check("encoder input", self.in_dim, input.len())?;
        let code = self
            .weight
            .chunks_exact(self.in_dim)
            .zip(&self.bias)
            .map(|(row, b)| {
                let dot: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                (self.w0 * (dot + b)).sin()
            })
            .collect();
        Ok(code)
    }
}

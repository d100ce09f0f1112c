use std::path::Path;

use super::artifact::{decoder_path, encoder_path};
use super::{
    Codebook, CodebookSlice, DecoderArtifact, EncoderArtifact, Fidelity, ModelLoadError,
    QuantizedEntry, ShapeId, ShapeMismatchError, SirenEncoder, VoxelDecoder,
};
use crate::field::VolumetricField;

/// A decoded field plus the codebook row it came from.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub field: VolumetricField,
    pub code_index: usize,
    /// Mean squared quantization distance.
    pub distance: f32,
}

/// Impact encoding → nearest codebook row → voxel field.
#[derive(Debug, Clone)]
pub struct QuantizedLatentDecoder {
    encoder: SirenEncoder,
    codebook: Codebook,
    decoder: VoxelDecoder,
    slice: Option<CodebookSlice>,
    style_dim: usize,
}

impl QuantizedLatentDecoder {
    /// Load `{model_dir}/{shape}/{shape}-{encoder,decoder}.json`.
    pub fn load(model_dir: impl AsRef<Path>, shape: &ShapeId) -> Result<Self, ModelLoadError> {
        let model_dir = model_dir.as_ref();
        let encoder = EncoderArtifact::load(encoder_path(model_dir, shape))?;
        let decoder = DecoderArtifact::load(decoder_path(model_dir, shape))?;
        let model = Self::from_artifacts(&encoder, &decoder, Some(shape))?;
        tracing::info!(
            shape = %shape,
            slots = model.slots(),
            codebook_rows = model.codebook.len(),
            data_shape = model.decoder.data_shape(),
            "Loaded fracture model"
        );
        Ok(model)
    }

    /// Build from in-memory artifacts. With `shape` set, lookups are
    /// restricted to that shape's codebook slice when the decoder lists one.
    pub fn from_artifacts(
        encoder: &EncoderArtifact,
        decoder: &DecoderArtifact,
        shape: Option<&ShapeId>,
    ) -> Result<Self, ModelLoadError> {
        let encoder = SirenEncoder::from_artifact(encoder)?;
        let codebook = Codebook::from_tensor(&decoder.codebook)?;
        let slice = shape
            .and_then(|s| decoder.shape_slices.get(s.as_str()))
            .map(|&[start, end]| codebook.slice(start, end))
            .transpose()?;
        let decoder = VoxelDecoder::from_artifact(decoder)?;

        if codebook.dim() != decoder.code_dim() {
            return Err(ModelLoadError::Inconsistent(format!(
                "codebook width {} does not match decoder input {}",
                codebook.dim(),
                decoder.code_dim()
            )));
        }
        if codebook.dim() < encoder.out_dim() {
            return Err(ModelLoadError::Inconsistent(format!(
                "codebook width {} is narrower than the latent code ({})",
                codebook.dim(),
                encoder.out_dim()
            )));
        }
        let style_dim = codebook.dim() - encoder.out_dim();

        Ok(Self {
            encoder,
            codebook,
            decoder,
            slice,
            style_dim,
        })
    }

    /// Impact slots per decode.
    pub fn slots(&self) -> usize {
        self.encoder.slots()
    }

    pub fn style_dim(&self) -> usize {
        self.style_dim
    }

    pub fn data_shape(&self) -> usize {
        self.decoder.data_shape()
    }

    pub fn slice(&self) -> Option<CodebookSlice> {
        self.slice
    }

    /// Latent code for `slots` impacts: `3 * slots` positions, `3 * slots`
    /// directions and `slots` normalised impulses.
    pub fn encode(&self, pos: &[f32], dir: &[f32], impulse: &[f32]) -> Result<Vec<f32>, ShapeMismatchError> {
        let slots = self.slots();
        ShapeMismatchError::check("impact position", 3 * slots, pos.len())?;
        ShapeMismatchError::check("impact direction", 3 * slots, dir.len())?;
        ShapeMismatchError::check("impact impulse", slots, impulse.len())?;

        let input: Vec<f32> = pos.iter().chain(dir).chain(impulse).copied().collect();
        self.encoder.encode(&input)
    }

    /// Nearest codebook row to `[latent, style]`. A missing style is zeros.
    pub fn quantize(&self, latent: &[f32], style: Option<&[f32]>) -> Result<QuantizedEntry, ShapeMismatchError> {
        ShapeMismatchError::check("latent code", self.encoder.out_dim(), latent.len())?;
        let mut query = Vec::with_capacity(self.codebook.dim());
        query.extend_from_slice(latent);
        match style {
            Some(style) => {
                ShapeMismatchError::check("style latent", self.style_dim, style.len())?;
                query.extend_from_slice(style);
            }
            None => query.resize(self.codebook.dim(), 0.0),
        }
        self.codebook.nearest(&query, self.slice)
    }

    /// Full decode path. Deterministic for equal inputs.
    pub fn decode(
        &self,
        pos: &[f32],
        dir: &[f32],
        impulse: &[f32],
        style: Option<&[f32]>,
        fidelity: Fidelity,
    ) -> Result<Decoded, ShapeMismatchError> {
        let latent = self.encode(pos, dir, impulse)?;
        let entry = self.quantize(&latent, style)?;
        tracing::debug!(
            code_index = entry.index,
            distance = entry.distance,
            %fidelity,
            "Quantized impact"
        );
        let field = self.decoder.decode(&entry.row, fidelity)?;
        Ok(Decoded {
            field,
            code_index: entry.index,
            distance: entry.distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{tiny_decoder, tiny_encoder};

    fn model() -> QuantizedLatentDecoder {
        // 4 latent values + 2 style values = codebook width 6.
        QuantizedLatentDecoder::from_artifacts(&tiny_encoder(1, 4), &tiny_decoder(6), None).unwrap()
    }

    #[test]
    fn test_dimensions() {
        let m = model();
        assert_eq!(m.slots(), 1);
        assert_eq!(m.style_dim(), 2);
        assert_eq!(m.data_shape(), 16);
        assert!(m.slice().is_none());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let m = model();
        let run = || {
            m.decode(&[0.1, 0.2, -0.3], &[0.0, 1.0, 0.0], &[0.5], None, Fidelity::Mid)
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.code_index, b.code_index);
        assert_eq!(a.distance.to_bits(), b.distance.to_bits());
        assert!(a
            .field
            .data()
            .iter()
            .zip(b.field.data())
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_arity_errors() {
        let m = model();
        let err = m
            .decode(&[0.0; 2], &[0.0; 3], &[0.0], None, Fidelity::Mid)
            .unwrap_err();
        assert_eq!(err.what, "impact position");
        assert!(m.encode(&[0.0; 3], &[0.0; 3], &[0.0; 2]).is_err());
        assert!(m.quantize(&[0.0; 4], Some(&[0.0; 3])).is_err());
    }

    #[test]
    fn test_zero_style_matches_explicit_zeros() {
        let m = model();
        let latent = m.encode(&[0.3, 0.0, 0.1], &[1.0, 0.0, 0.0], &[-0.2]).unwrap();
        assert_eq!(
            m.quantize(&latent, None).unwrap(),
            m.quantize(&latent, Some(&[0.0, 0.0])).unwrap()
        );
    }

    #[test]
    fn test_shape_slice_is_resolved() {
        let mut decoder = tiny_decoder(6);
        decoder.shape_slices.insert("bunny".into(), [3, 6]);
        let shape = ShapeId::new("bunny");
        let m = QuantizedLatentDecoder::from_artifacts(&tiny_encoder(1, 4), &decoder, Some(&shape))
            .unwrap();
        assert_eq!(m.slice(), Some(CodebookSlice { start: 3, end: 6 }));

        let latent = vec![0.0; 4];
        let entry = m.quantize(&latent, None).unwrap();
        assert!((3..6).contains(&entry.index));

        decoder.shape_slices.insert("bunny".into(), [3, 9]);
        assert!(QuantizedLatentDecoder::from_artifacts(&tiny_encoder(1, 4), &decoder, Some(&shape)).is_err());
    }

    #[test]
    fn test_codebook_narrower_than_latent() {
        assert!(matches!(
            QuantizedLatentDecoder::from_artifacts(&tiny_encoder(1, 8), &tiny_decoder(6), None),
            Err(ModelLoadError::Inconsistent(_))
        ));
    }
}

//! Small deterministic artifacts for unit tests.

use super::{ConvBlockArtifact, DecoderArtifact, EncoderArtifact, Tensor, CURRENT_FORMAT_VERSION};

/// Deterministic pseudo-random values in `[-scale, scale]`.
fn values(seed: u32, len: usize, scale: f32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * scale
        })
        .collect()
}

fn tensor(seed: u32, shape: Vec<usize>, scale: f32) -> Tensor {
    let len = shape.iter().product();
    Tensor::new(shape, values(seed, len, scale))
}

fn block(seed: u32, inc: usize, outc: usize) -> ConvBlockArtifact {
    ConvBlockArtifact {
        weight: tensor(seed, vec![inc, outc, 4, 4, 4], 0.5),
        bias: tensor(seed + 1, vec![outc], 0.1),
        bn_weight: Tensor::new(vec![outc], vec![1.0; outc]),
        bn_bias: tensor(seed + 2, vec![outc], 0.1),
        running_mean: tensor(seed + 3, vec![outc], 0.05),
        running_var: Tensor::new(vec![outc], vec![1.0; outc]),
    }
}

/// A 16^3 decoder with `ndf = 2` reading codes of width `code_dim`.
pub(crate) fn tiny_decoder(code_dim: usize) -> DecoderArtifact {
    let features = 2 * 8;
    DecoderArtifact {
        format_version: CURRENT_FORMAT_VERSION,
        data_shape: 16,
        ndf: 2,
        fc_weight: tensor(1, vec![features, code_dim], 1.0),
        fc_bias: tensor(2, vec![features], 0.1),
        blocks: vec![block(10, 16, 8), block(20, 8, 4), block(30, 4, 2)],
        mid_head: tensor(40, vec![2, 1, 4, 4, 4], 0.5),
        high_block: block(50, 2, 1),
        high_head: tensor(60, vec![1, 1, 4, 4, 4], 0.5),
        codebook: tensor(70, vec![6, code_dim], 1.0),
        batch_norm_eps: 0.8,
        shape_slices: Default::default(),
    }
}

/// An encoder for `slots` impact slots producing `latent` values.
pub(crate) fn tiny_encoder(slots: usize, latent: usize) -> EncoderArtifact {
    EncoderArtifact {
        format_version: CURRENT_FORMAT_VERSION,
        w0: 1.0,
        weight: tensor(80, vec![latent, 7 * slots], 1.0),
        bias: tensor(81, vec![latent], 0.1),
    }
}

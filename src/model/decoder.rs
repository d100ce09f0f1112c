//! Transposed-convolution voxel decoder.
//!
//! All activations are channel-major `[C][X][Y][Z]`, so the single output
//! channel is directly an x-major [`VolumetricField`].

use rayon::prelude::*;

use super::{ConvBlockArtifact, DecoderArtifact, Fidelity, ModelLoadError, ShapeMismatchError, Tensor};
use crate::field::VolumetricField;

const KERNEL: usize = 4;
const KERNEL_VOLUME: usize = KERNEL * KERNEL * KERNEL;
const LEAKY_SLOPE: f32 = 0.2;

#[inline]
fn leaky_relu(x: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        x * LEAKY_SLOPE
    }
}

/// Input taps `(input index, kernel index)` feeding output index `o` of a
/// stride-2, padding-1, kernel-4 transposed convolution.
fn taps(o: usize, size: usize) -> ([(usize, usize); 2], usize) {
    let m = o as isize / 2;
    let candidates = if o % 2 == 0 {
        [(m - 1, 3), (m, 1)]
    } else {
        [(m, 2), (m + 1, 0)]
    };
    let mut out = [(0, 0); 2];
    let mut n = 0;
    for (i, k) in candidates {
        if i >= 0 && (i as usize) < size {
            out[n] = (i as usize, k);
            n += 1;
        }
    }
    (out, n)
}

/// `ConvTranspose3d(kernel 4, stride 2, padding 1)`: doubles each spatial axis.
#[derive(Debug, Clone)]
struct ConvTranspose3d {
    in_channels: usize,
    out_channels: usize,
    /// `[in, out, 4, 4, 4]`
    weight: Vec<f32>,
    bias: Option<Vec<f32>>,
}

impl ConvTranspose3d {
    fn from_tensors(
        name: &str,
        weight: &Tensor,
        bias: Option<&Tensor>,
        in_channels: usize,
        out_channels: usize,
    ) -> Result<Self, ModelLoadError> {
        weight.expect_shape(
            &format!("{}.weight", name),
            &[in_channels, out_channels, KERNEL, KERNEL, KERNEL],
        )?;
        if let Some(b) = bias {
            b.expect_shape(&format!("{}.bias", name), &[out_channels])?;
        }
        Ok(Self {
            in_channels,
            out_channels,
            weight: weight.data.clone(),
            bias: bias.map(|b| b.data.clone()),
        })
    }

    /// Input is `[in][size]^3`, output `[out][2 size]^3`.
    ///
    /// Each output plane `(co, ox)` is computed independently; every value is
    /// reduced over input channels then taps in a fixed order.
    fn forward(&self, input: &[f32], size: usize) -> Vec<f32> {
        let so = size * 2;
        let plane = so * so;
        let vol_in = size * size * size;
        let table: Vec<_> = (0..so).map(|o| taps(o, size)).collect();

        let mut out = vec![0.0f32; self.out_channels * so * plane];
        out.par_chunks_mut(plane)
            .enumerate()
            .for_each(|(chunk, dst)| {
                let co = chunk / so;
                let (tx, nx) = table[chunk % so];
                let bias = self.bias.as_ref().map_or(0.0, |b| b[co]);
                for oy in 0..so {
                    let (ty, ny) = table[oy];
                    for oz in 0..so {
                        let (tz, nz) = table[oz];
                        let mut acc = 0.0f32;
                        for ci in 0..self.in_channels {
                            let src = &input[ci * vol_in..(ci + 1) * vol_in];
                            let w = &self.weight[(ci * self.out_channels + co) * KERNEL_VOLUME..];
                            for &(ix, kx) in &tx[..nx] {
                                for &(iy, ky) in &ty[..ny] {
                                    for &(iz, kz) in &tz[..nz] {
                                        acc += src[(ix * size + iy) * size + iz]
                                            * w[(kx * KERNEL + ky) * KERNEL + kz];
                                    }
                                }
                            }
                        }
                        dst[oy * so + oz] = acc + bias;
                    }
                }
            });
        out
    }
}

/// `ConvTranspose3d + BatchNorm3d (eval) + LeakyReLU(0.2)`.
#[derive(Debug, Clone)]
struct ConvBlock {
    conv: ConvTranspose3d,
    bn_scale: Vec<f32>,
    bn_shift: Vec<f32>,
}

impl ConvBlock {
    fn from_artifact(
        name: &str,
        a: &ConvBlockArtifact,
        in_channels: usize,
        out_channels: usize,
        eps: f32,
    ) -> Result<Self, ModelLoadError> {
        let conv = ConvTranspose3d::from_tensors(name, &a.weight, Some(&a.bias), in_channels, out_channels)?;
        for (suffix, t) in [
            ("bn_weight", &a.bn_weight),
            ("bn_bias", &a.bn_bias),
            ("running_mean", &a.running_mean),
            ("running_var", &a.running_var),
        ] {
            t.expect_shape(&format!("{}.{}", name, suffix), &[out_channels])?;
        }

        let mut bn_scale = Vec::with_capacity(out_channels);
        let mut bn_shift = Vec::with_capacity(out_channels);
        for c in 0..out_channels {
            let scale = a.bn_weight.data[c] / (a.running_var.data[c] + eps).sqrt();
            bn_scale.push(scale);
            bn_shift.push(a.bn_bias.data[c] - a.running_mean.data[c] * scale);
        }
        Ok(Self {
            conv,
            bn_scale,
            bn_shift,
        })
    }

    fn forward(&self, input: &[f32], size: usize) -> Vec<f32> {
        let mut out = self.conv.forward(input, size);
        let vol = out.len() / self.conv.out_channels;
        out.par_chunks_mut(vol).enumerate().for_each(|(c, channel)| {
            let (scale, shift) = (self.bn_scale[c], self.bn_shift[c]);
            for v in channel {
                *v = leaky_relu(*v * scale + shift);
            }
        });
        out
    }
}

/// Expands a codebook row into a dense field.
#[derive(Debug, Clone)]
pub struct VoxelDecoder {
    data_shape: usize,
    code_dim: usize,
    /// `[features, code_dim]`
    fc_weight: Vec<f32>,
    fc_bias: Vec<f32>,
    blocks: Vec<ConvBlock>,
    mid_head: ConvTranspose3d,
    high_block: ConvBlock,
    high_head: ConvTranspose3d,
}

impl VoxelDecoder {
    pub fn from_artifact(a: &DecoderArtifact) -> Result<Self, ModelLoadError> {
        if a.data_shape == 0 || a.data_shape % 16 != 0 {
            return Err(ModelLoadError::Inconsistent(format!(
                "data_shape {} is not a positive multiple of 16",
                a.data_shape
            )));
        }
        if a.ndf < 2 || a.ndf % 2 != 0 {
            return Err(ModelLoadError::Inconsistent(format!(
                "ndf {} must be even and at least 2",
                a.ndf
            )));
        }
        if !(a.batch_norm_eps > 0.0 && a.batch_norm_eps.is_finite()) {
            return Err(ModelLoadError::Inconsistent(format!(
                "batch_norm_eps must be positive, got {}",
                a.batch_norm_eps
            )));
        }
        if a.blocks.len() != 3 {
            return Err(ModelLoadError::Inconsistent(format!(
                "expected 3 decoder blocks, found {}",
                a.blocks.len()
            )));
        }

        let base = a.data_shape / 16;
        let features = a.ndf * 8 * base * base * base;
        let (rows, code_dim) = a.fc_weight.matrix_dims("fc.weight")?;
        if rows != features {
            return Err(ModelLoadError::Tensor {
                name: "fc.weight".into(),
                message: format!("expected {} rows for ndf {}, found {}", features, a.ndf, rows),
            });
        }
        a.fc_bias.expect_shape("fc.bias", &[features])?;

        let mut channels = a.ndf * 8;
        let mut blocks = Vec::with_capacity(3);
        for (i, block) in a.blocks.iter().enumerate() {
            let name = format!("blocks.{}", i);
            blocks.push(ConvBlock::from_artifact(&name, block, channels, channels / 2, a.batch_norm_eps)?);
            channels /= 2;
        }

        Ok(Self {
            data_shape: a.data_shape,
            code_dim,
            fc_weight: a.fc_weight.data.clone(),
            fc_bias: a.fc_bias.data.clone(),
            blocks,
            mid_head: ConvTranspose3d::from_tensors("mid_head", &a.mid_head, None, a.ndf, 1)?,
            high_block: ConvBlock::from_artifact("high_block", &a.high_block, a.ndf, a.ndf / 2, a.batch_norm_eps)?,
            high_head: ConvTranspose3d::from_tensors("high_head", &a.high_head, None, a.ndf / 2, 1)?,
        })
    }

    /// Native output resolution.
    pub fn data_shape(&self) -> usize {
        self.data_shape
    }

    /// Width of the codebook rows this decoder accepts.
    pub fn code_dim(&self) -> usize {
        self.code_dim
    }

    /// Shared trunk: fc, reshape, three upsampling blocks. Returns the
    /// activations and their spatial size (`S / 2`).
    fn trunk(&self, code: &[f32]) -> Result<(Vec<f32>, usize), ShapeMismatchError> {
        ShapeMismatchError::check("decoder code", self.code_dim, code.len())?;
        let features: Vec<f32> = self
            .fc_weight
            .par_chunks(self.code_dim)
            .zip(self.fc_bias.par_iter())
            .map(|(row, b)| {
                let dot: f32 = row.iter().zip(code).map(|(w, x)| w * x).sum();
                leaky_relu(dot + b)
            })
            .collect();

        let mut size = self.data_shape / 16;
        let mut x = features;
        for block in &self.blocks {
            x = block.forward(&x, size);
            size *= 2;
        }
        Ok((x, size))
    }

    /// Decode a codebook row at the requested fidelity.
    ///
    /// `Low` is a stride-2 nearest downsample of the `Mid` decode.
    pub fn decode(&self, code: &[f32], fidelity: Fidelity) -> Result<VolumetricField, ShapeMismatchError> {
        let (trunk, size) = self.trunk(code)?;
        let (mut values, resolution) = match fidelity {
            Fidelity::Low | Fidelity::Mid => (self.mid_head.forward(&trunk, size), size * 2),
            Fidelity::High => {
                let x = self.high_block.forward(&trunk, size);
                (self.high_head.forward(&x, size * 2), size * 4)
            }
        };
        values.par_iter_mut().for_each(|v| *v = v.tanh());

        let mut field = VolumetricField::new(resolution);
        field.data_mut().copy_from_slice(&values);
        Ok(match fidelity {
            Fidelity::Low => field.downsample_nearest(self.data_shape / 2),
            _ => field,
        })
    }
}

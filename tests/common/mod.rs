//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use deepfracture::glam::Vec3;
use deepfracture::model::{ConvBlockArtifact, DecoderArtifact, EncoderArtifact, Tensor, CURRENT_FORMAT_VERSION};
use deepfracture::FragmentMesh;

/// Closed, outward-facing box.
pub fn cuboid(center: Vec3, half: Vec3) -> FragmentMesh {
    let c = |x: f32, y: f32, z: f32| center + half * Vec3::new(x, y, z);
    let vertices = vec![
        c(-1.0, -1.0, -1.0),
        c(1.0, -1.0, -1.0),
        c(1.0, 1.0, -1.0),
        c(-1.0, 1.0, -1.0),
        c(-1.0, -1.0, 1.0),
        c(1.0, -1.0, 1.0),
        c(1.0, 1.0, 1.0),
        c(-1.0, 1.0, 1.0),
    ];
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 6, 2],
        [3, 7, 6],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    FragmentMesh::new(vertices, faces)
}

/// A unit cube cut into three slabs along X.
pub fn three_slabs(half: f32) -> Vec<FragmentMesh> {
    let width = 2.0 * half / 3.0;
    (0..3)
        .map(|i| {
            let x = -half + width * (i as f32 + 0.5);
            cuboid(Vec3::new(x, 0.0, 0.0), Vec3::new(width / 2.0, half, half))
        })
        .collect()
}

/// Unique scratch directory, emptied.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("deepfracture_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn values(seed: u32, len: usize, scale: f32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(12_345);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
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
        running_mean: Tensor::zeros(vec![outc]),
        running_var: Tensor::new(vec![outc], vec![1.0; outc]),
    }
}

/// One-slot encoder producing `latent` values.
pub fn encoder(latent: usize) -> EncoderArtifact {
    EncoderArtifact {
        format_version: CURRENT_FORMAT_VERSION,
        w0: 1.0,
        weight: tensor(3, vec![latent, 7], 1.0),
        bias: tensor(4, vec![latent], 0.1),
    }
}

/// 16^3 decoder with `ndf = 2` and an 8-row codebook of width `code_dim`.
pub fn decoder(code_dim: usize) -> DecoderArtifact {
    DecoderArtifact {
        format_version: CURRENT_FORMAT_VERSION,
        data_shape: 16,
        ndf: 2,
        fc_weight: tensor(5, vec![16, code_dim], 1.0),
        fc_bias: tensor(6, vec![16], 0.1),
        blocks: vec![block(10, 16, 8), block(20, 8, 4), block(30, 4, 2)],
        mid_head: tensor(40, vec![2, 1, 4, 4, 4], 0.5),
        high_block: block(50, 2, 1),
        high_head: tensor(60, vec![1, 1, 4, 4, 4], 0.5),
        codebook: tensor(70, vec![8, code_dim], 1.0),
        batch_norm_eps: 0.8,
        shape_slices: Default::default(),
    }
}

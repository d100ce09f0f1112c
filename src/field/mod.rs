//! Dense cubic voxel grids: decoded SDF fields and watershed label volumes.
//!
//! Both grids are stored x-major: `index = (x * R + y) * R + z`, which is
//! the memory order of the decoder's `(D, H, W)` output tensor.

pub mod nifti;

use std::collections::BTreeMap;

use glam::Vec3;
use thiserror::Error;

pub use nifti::{read_field, read_labels, write_field, write_labels, NiftiError};

/// Label assigned to voxels that belong to no fragment.
pub const REJECT_LABEL: i32 = -1;
/// Label the watershed assigns to dam voxels between two basins.
pub const DAM_LABEL: i32 = 0;

/// Errors raised when building a grid from raw data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("grid of resolution {resolution} needs {expected} values, got {actual}")]
    DataLength {
        resolution: usize,
        expected: usize,
        actual: usize,
    },
}

/// Row-major index into a cubic grid of side `resolution`.
#[inline]
pub fn grid_index(resolution: usize, x: usize, y: usize, z: usize) -> usize {
    (x * resolution + y) * resolution + z
}

/// Inverse of [`grid_index`].
#[inline]
pub fn grid_coords(resolution: usize, index: usize) -> [usize; 3] {
    let z = index % resolution;
    let y = (index / resolution) % resolution;
    let x = index / (resolution * resolution);
    [x, y, z]
}

/// Position of a grid sample in the grid frame: `(i - R/2) * 2/R`.
///
/// This is the normalised `[-1, 1)` cube before the axis realignment applied
/// by the fragment pipeline.
#[inline]
pub fn grid_sample_position(resolution: usize, x: usize, y: usize, z: usize) -> Vec3 {
    let half = resolution as f32 / 2.0;
    let scale = 2.0 / resolution as f32;
    (Vec3::new(x as f32, y as f32, z as f32) - Vec3::splat(half)) * scale
}

/// A cubic scalar grid holding an inverted SDF (positive inside).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumetricField {
    resolution: usize,
    data: Vec<f32>,
}

impl VolumetricField {
    /// A field of zeros.
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            data: vec![0.0; resolution * resolution * resolution],
        }
    }

    pub fn from_data(resolution: usize, data: Vec<f32>) -> Result<Self, FieldError> {
        let expected = resolution * resolution * resolution;
        if data.len() != expected {
            return Err(FieldError::DataLength {
                resolution,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { resolution, data })
    }

    /// Sample `f` at every grid position (see [`grid_sample_position`]).
    pub fn from_fn(resolution: usize, f: impl Fn(Vec3) -> f32) -> Self {
        let mut field = Self::new(resolution);
        for x in 0..resolution {
            for y in 0..resolution {
                for z in 0..resolution {
                    let idx = grid_index(resolution, x, y, z);
                    field.data[idx] = f(grid_sample_position(resolution, x, y, z));
                }
            }
        }
        field
    }

    #[inline]
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[grid_index(self.resolution, x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        let idx = grid_index(self.resolution, x, y, z);
        self.data[idx] = value;
    }

    pub fn min_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Add `bias` to every voxel.
    pub fn offset(&self, bias: f32) -> Self {
        Self {
            resolution: self.resolution,
            data: self.data.iter().map(|v| v + bias).collect(),
        }
    }

    /// `true` where the field is non-negative.
    pub fn interior_mask(&self) -> Vec<bool> {
        self.data.iter().map(|&v| v >= 0.0).collect()
    }

    /// Remap to a watershed image: `255 - (|v| + 1) / 2 * 255`.
    ///
    /// The surface maps to the brightest ridge (127.5) and the deep interior
    /// and far exterior both become dark basins.
    pub fn discretize(&self) -> Self {
        Self {
            resolution: self.resolution,
            data: self
                .data
                .iter()
                .map(|&v| 255.0 - (v.abs() + 1.0) / 2.0 * 255.0)
                .collect(),
        }
    }

    /// Nearest-neighbour resampling to `target` voxels per axis.
    ///
    /// Source index is `floor(dst * R_in / R_out)`, which for a halving is a
    /// stride-2 pick of even samples.
    pub fn downsample_nearest(&self, target: usize) -> Self {
        let src = self.resolution;
        let pick = |d: usize| (d * src) / target;
        let mut out = Self::new(target);
        for x in 0..target {
            for y in 0..target {
                for z in 0..target {
                    out.set(x, y, z, self.get(pick(x), pick(y), pick(z)));
                }
            }
        }
        out
    }
}

/// An integer label per voxel, produced by segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVolume {
    resolution: usize,
    labels: Vec<i32>,
}

impl LabelVolume {
    /// A volume filled with `fill`.
    pub fn new(resolution: usize, fill: i32) -> Self {
        Self {
            resolution,
            labels: vec![fill; resolution * resolution * resolution],
        }
    }

    pub fn from_data(resolution: usize, labels: Vec<i32>) -> Result<Self, FieldError> {
        let expected = resolution * resolution * resolution;
        if labels.len() != expected {
            return Err(FieldError::DataLength {
                resolution,
                expected,
                actual: labels.len(),
            });
        }
        Ok(Self { resolution, labels })
    }

    #[inline]
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut [i32] {
        &mut self.labels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> i32 {
        self.labels[grid_index(self.resolution, x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, label: i32) {
        let idx = grid_index(self.resolution, x, y, z);
        self.labels[idx] = label;
    }

    /// Voxel count per label, ordered by label.
    pub fn counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// Force every voxel outside `mask` to [`REJECT_LABEL`].
    pub fn apply_mask(&mut self, mask: &[bool]) {
        for (label, &inside) in self.labels.iter_mut().zip(mask) {
            if !inside {
                *label = REJECT_LABEL;
            }
        }
    }

    /// Reassign every label with fewer than `min_voxels` voxels to
    /// [`REJECT_LABEL`]. Returns the number of labels removed.
    pub fn discard_small(&mut self, min_voxels: usize) -> usize {
        let small: Vec<i32> = self
            .counts()
            .into_iter()
            .filter(|&(label, count)| label != REJECT_LABEL && count < min_voxels)
            .map(|(label, _)| label)
            .collect();
        if small.is_empty() {
            return 0;
        }
        for label in &mut self.labels {
            if small.binary_search(label).is_ok() {
                *label = REJECT_LABEL;
            }
        }
        small.len()
    }

    /// Number of distinct fragment labels (strictly positive).
    pub fn fragment_label_count(&self) -> usize {
        self.counts().keys().filter(|&&l| l > DAM_LABEL).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let r = 7;
        for idx in [0, 1, 6, 7, 48, 342] {
            let [x, y, z] = grid_coords(r, idx);
            assert_eq!(grid_index(r, x, y, z), idx);
        }
    }

    #[test]
    fn test_from_data_rejects_wrong_length() {
        let err = VolumetricField::from_data(4, vec![0.0; 63]).unwrap_err();
        assert_eq!(
            err,
            FieldError::DataLength {
                resolution: 4,
                expected: 64,
                actual: 63
            }
        );
    }

    #[test]
    fn test_discretize_maps_surface_to_ridge() {
        let field = VolumetricField::from_data(1, vec![0.0]).unwrap();
        assert!((field.discretize().data()[0] - 127.5).abs() < 1e-4);

        let field = VolumetricField::from_data(1, vec![-1.0]).unwrap();
        assert!(field.discretize().data()[0].abs() < 1e-4);

        let field = VolumetricField::from_data(1, vec![1.0]).unwrap();
        assert!(field.discretize().data()[0].abs() < 1e-4);
    }

    #[test]
    fn test_interior_mask_uses_shifted_values() {
        let field = VolumetricField::from_data(1, vec![-0.01]).unwrap();
        assert!(!field.interior_mask()[0]);
        assert!(field.offset(0.03).interior_mask()[0]);
    }

    #[test]
    fn test_downsample_picks_even_samples() {
        let field = VolumetricField::from_fn(8, |p| p.x * 100.0 + p.y * 10.0 + p.z);
        let small = field.downsample_nearest(4);
        assert_eq!(small.resolution(), 4);
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    assert_eq!(small.get(x, y, z), field.get(2 * x, 2 * y, 2 * z));
                }
            }
        }
    }

    #[test]
    fn test_discard_small_labels() {
        let mut labels = LabelVolume::new(3, REJECT_LABEL);
        for i in 0..10 {
            labels.labels_mut()[i] = 1;
        }
        labels.labels_mut()[20] = 2;
        labels.labels_mut()[21] = 0;

        let removed = labels.discard_small(5);
        assert_eq!(removed, 2, "label 2 and the dam label are both below 5");
        assert_eq!(labels.counts().get(&1), Some(&10));
        assert_eq!(labels.counts().get(&2), None);
        assert_eq!(labels.fragment_label_count(), 1);
    }

    #[test]
    fn test_apply_mask() {
        let mut labels = LabelVolume::new(2, 3);
        let mut mask = vec![true; 8];
        mask[5] = false;
        labels.apply_mask(&mask);
        assert_eq!(labels.labels()[5], REJECT_LABEL);
        assert_eq!(labels.labels()[4], 3);
    }
}

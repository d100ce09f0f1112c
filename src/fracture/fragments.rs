//! Volumetric field → fragment meshes.
//!
//! The pipeline:
//!
//! 1. Shift the field by the isolevel bias and record the interior mask
//! 2. Discretise into a watershed image and segment it
//! 3. Reject voxels outside the mask and labels below the noise threshold
//! 4. Extract and smooth the label surface, map it into object space
//! 5. Intersect each connected piece with the original surface on a
//!    bounded rayon pool
//! 6. Keep pieces that are closed volumes with enough faces
//!
//! Component failures are logged and skipped. Only segmentation backend
//! errors abort a call.

use std::f32::consts::{FRAC_PI_2, PI};
use std::path::Path;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rayon::prelude::*;
use thiserror::Error;

use crate::field::{write_labels, VolumetricField};
use crate::mesh::{
    laplacian_smooth, split_components, surface_nets::label_surface, write_obj,
    BooleanOperationFailure, BspBoolean, FragmentMesh, MeshBoolean, SmoothingParams,
};
use crate::model::Fidelity;
use crate::segmentation::{SegmentationBackendError, Segmenter, WatershedParams, WatershedSegmenter};

/// Upper bound on boolean worker threads.
const MAX_BOOLEAN_THREADS: usize = 8;

/// Per-fidelity segmentation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentParams {
    pub fidelity: Fidelity,
    /// Added to the field before masking; also the surface isolevel.
    pub isolevel_bias: f32,
    /// Labels with fewer voxels are rejected.
    pub noise_threshold: usize,
    /// Fragments with fewer faces are dropped.
    pub min_faces: usize,
    pub smoothing_iterations: usize,
}

impl SegmentParams {
    /// Presets for `fidelity`. `max_value` normalises the isolevel bias.
    pub fn for_fidelity(fidelity: Fidelity, max_value: f32) -> Self {
        let max_value = if max_value.is_finite() && max_value > 0.0 {
            max_value
        } else {
            1.0
        };
        let (noise_threshold, min_faces) = match fidelity {
            Fidelity::Low => (50, 50),
            Fidelity::Mid => (50, 200),
            Fidelity::High => (500, 400),
        };
        Self {
            fidelity,
            isolevel_bias: 0.03 / max_value,
            noise_threshold,
            min_faces,
            smoothing_iterations: SmoothingParams::default().iterations,
        }
    }

    pub fn with_min_faces(mut self, min_faces: usize) -> Self {
        self.min_faces = min_faces;
        self
    }

    pub fn with_noise_threshold(mut self, noise_threshold: usize) -> Self {
        self.noise_threshold = noise_threshold;
        self
    }

    pub fn with_isolevel_bias(mut self, isolevel_bias: f32) -> Self {
        self.isolevel_bias = isolevel_bias;
        self
    }
}

/// Why one connected piece did not become a fragment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentSkip {
    #[error("segment could not be made watertight")]
    SegmentNotWatertight,

    #[error("boolean intersection failed: {0}")]
    Boolean(#[from] BooleanOperationFailure),

    #[error("intersection result could not be repaired into a volume")]
    ResultNotVolume,

    #[error("{faces} faces, below the minimum of {min_faces}")]
    TooFewFaces { faces: usize, min_faces: usize },
}

/// Grid orientation relative to object space.
fn grid_rotation() -> Quat {
    Quat::from_rotation_z(FRAC_PI_2) * Quat::from_rotation_y(-FRAC_PI_2) * Quat::from_rotation_x(PI)
}

/// Map voxel-unit positions of a `resolution` grid into the object's
/// `[-1, 1]³` frame.
pub fn grid_to_object(mesh: &mut FragmentMesh, resolution: usize) {
    let half = resolution as f32 / 2.0;
    let scale = 2.0 / resolution as f32;
    let rotation = grid_rotation();
    for v in &mut mesh.vertices {
        *v = rotation * ((*v - Vec3::splat(half)) * scale);
    }
}

/// Inverse of [`grid_to_object`] for a single point.
pub fn object_to_grid(point: Vec3, resolution: usize) -> Vec3 {
    let half = resolution as f32 / 2.0;
    grid_rotation().inverse() * point * (resolution as f32 / 2.0) + Vec3::splat(half)
}

/// Splits a predicted field into fragment meshes.
#[derive(Clone)]
pub struct FieldToFragments {
    segmenter: Arc<dyn Segmenter>,
    boolean: Arc<dyn MeshBoolean>,
    watershed: WatershedParams,
    max_threads: usize,
}

impl Default for FieldToFragments {
    fn default() -> Self {
        Self::new(Arc::new(WatershedSegmenter), Arc::new(BspBoolean))
    }
}

impl std::fmt::Debug for FieldToFragments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldToFragments")
            .field("segmenter", &self.segmenter.name())
            .field("watershed", &self.watershed)
            .field("max_threads", &self.max_threads)
            .finish()
    }
}

impl FieldToFragments {
    pub fn new(segmenter: Arc<dyn Segmenter>, boolean: Arc<dyn MeshBoolean>) -> Self {
        Self {
            segmenter,
            boolean,
            watershed: WatershedParams::default(),
            max_threads: MAX_BOOLEAN_THREADS,
        }
    }

    pub fn with_watershed(mut self, watershed: WatershedParams) -> Self {
        self.watershed = watershed;
        self
    }

    /// Cap the boolean pool below the default of 8 threads.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.clamp(1, MAX_BOOLEAN_THREADS);
        self
    }

    /// Segment `field` into fragments clipped to `surface` (object space).
    ///
    /// With a `work_dir`, the label volume is written to `imj.nii` and the
    /// kept fragments to `objs/vol_{n}.obj`, `n` counting from 1.
    pub fn segment(
        &self,
        field: &VolumetricField,
        surface: &FragmentMesh,
        params: &SegmentParams,
        work_dir: Option<&Path>,
    ) -> Result<Vec<FragmentMesh>, SegmentationBackendError> {
        let resolution = field.resolution();
        if resolution < 2 {
            return Err(SegmentationBackendError::InvalidInput(format!(
                "field resolution {} is too small",
                resolution
            )));
        }

        let shifted = field.offset(params.isolevel_bias);
        let mask = shifted.interior_mask();
        let image = shifted.discretize();

        let mut labels = self.segmenter.segment(&image, &self.watershed)?;
        if labels.resolution() != resolution {
            return Err(SegmentationBackendError::ResolutionMismatch {
                expected: resolution,
                actual: labels.resolution(),
            });
        }
        labels.apply_mask(&mask);
        let discarded = labels.discard_small(params.noise_threshold);
        tracing::debug!(
            backend = self.segmenter.name(),
            labels = labels.fragment_label_count(),
            discarded,
            "Segmented field"
        );

        if let Some(dir) = work_dir {
            if let Err(e) = write_labels(dir.join("imj.nii"), &labels) {
                tracing::warn!("Failed to write label diagnostic: {}", e);
            }
        }

        let mut raw = label_surface(&labels, params.isolevel_bias);
        laplacian_smooth(
            &mut raw,
            &SmoothingParams {
                iterations: params.smoothing_iterations,
                ..SmoothingParams::default()
            },
        );
        grid_to_object(&mut raw, resolution);

        let parts = split_components(&raw);
        let fragments: Vec<FragmentMesh> = self
            .assemble(&parts, surface, params.min_faces)
            .into_iter()
            .enumerate()
            .filter_map(|(index, result)| match result {
                Ok(mesh) => Some(mesh),
                Err(reason) => {
                    tracing::warn!(component = index, "Skipping component: {}", reason);
                    None
                }
            })
            .collect();

        tracing::info!(
            components = parts.len(),
            fragments = fragments.len(),
            fidelity = %params.fidelity,
            "Field split into fragments"
        );

        if let Some(dir) = work_dir {
            write_fragments(&dir.join("objs"), &fragments);
        }
        Ok(fragments)
    }

    /// Clip every piece against `surface`, one result per piece in input
    /// order.
    pub fn assemble(
        &self,
        parts: &[FragmentMesh],
        surface: &FragmentMesh,
        min_faces: usize,
    ) -> Vec<Result<FragmentMesh, ComponentSkip>> {
        if parts.is_empty() {
            return Vec::new();
        }
        let threads = parts
            .len()
            .min(rayon::current_num_threads())
            .min(self.max_threads)
            .max(1);
        let work = || {
            parts
                .par_iter()
                .map(|part| self.clip(part, surface, min_faces))
                .collect::<Vec<_>>()
        };
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(work),
            Err(e) => {
                tracing::warn!("Boolean pool unavailable, clipping sequentially: {}", e);
                parts.iter().map(|part| self.clip(part, surface, min_faces)).collect()
            }
        }
    }

    fn clip(&self, part: &FragmentMesh, surface: &FragmentMesh, min_faces: usize) -> Result<FragmentMesh, ComponentSkip> {
        let closed;
        let part = if part.is_volume() {
            part
        } else {
            closed = self
                .boolean
                .make_watertight(part)
                .ok_or(ComponentSkip::SegmentNotWatertight)?;
            &closed
        };

        let mut result = self.boolean.intersection(part, surface)?;
        if !result.is_volume() {
            result = self
                .boolean
                .make_watertight(&result)
                .filter(FragmentMesh::is_volume)
                .ok_or(ComponentSkip::ResultNotVolume)?;
        }

        if result.face_count() < min_faces {
            return Err(ComponentSkip::TooFewFaces {
                faces: result.face_count(),
                min_faces,
            });
        }
        Ok(result)
    }
}

fn write_fragments(dir: &Path, fragments: &[FragmentMesh]) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("Failed to create {}: {}", dir.display(), e);
        return;
    }
    for (n, mesh) in fragments.iter().enumerate() {
        let path = dir.join(format!("vol_{}.obj", n + 1));
        if let Err(e) = write_obj(mesh, &path) {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::LabelVolume;
    use crate::mesh::test_shapes::{cuboid, tetrahedron};

    /// Labels every voxel of the image as one basin.
    struct OneBasin;

    impl Segmenter for OneBasin {
        fn name(&self) -> &str {
            "one-basin"
        }

        fn segment(&self, image: &VolumetricField, _: &WatershedParams) -> Result<LabelVolume, SegmentationBackendError> {
            Ok(LabelVolume::new(image.resolution(), 1))
        }
    }

    struct Broken;

    impl Segmenter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn segment(&self, _: &VolumetricField, _: &WatershedParams) -> Result<LabelVolume, SegmentationBackendError> {
            Err(SegmentationBackendError::Missing {
                program: "broken".into(),
            })
        }
    }

    fn sphere_field(resolution: usize, radius: f32) -> VolumetricField {
        VolumetricField::from_fn(resolution, |p| radius - p.length())
    }

    #[test]
    fn test_presets() {
        let low = SegmentParams::for_fidelity(Fidelity::Low, 1.0);
        assert_eq!((low.noise_threshold, low.min_faces), (50, 50));
        let mid = SegmentParams::for_fidelity(Fidelity::Mid, 0.5);
        assert_eq!((mid.noise_threshold, mid.min_faces), (50, 200));
        assert!((mid.isolevel_bias - 0.06).abs() < 1e-6);
        let high = SegmentParams::for_fidelity(Fidelity::High, 1.0);
        assert_eq!((high.noise_threshold, high.min_faces), (500, 400));
        assert_eq!(high.smoothing_iterations, 15);
        assert_eq!(SegmentParams::for_fidelity(Fidelity::Mid, 0.0).isolevel_bias, 0.03);
    }

    #[test]
    fn test_grid_mapping_round_trip() {
        let mut mesh = FragmentMesh::new(vec![Vec3::new(3.0, 10.0, 7.5)], vec![]);
        grid_to_object(&mut mesh, 16);
        let back = object_to_grid(mesh.vertices[0], 16);
        assert!((back - Vec3::new(3.0, 10.0, 7.5)).length() < 1e-4, "{:?}", back);

        // The grid centre is the object origin.
        let mut centre = FragmentMesh::new(vec![Vec3::splat(8.0)], vec![]);
        grid_to_object(&mut centre, 16);
        assert!(centre.vertices[0].length() < 1e-6);
    }

    #[test]
    fn test_grid_mapping_preserves_orientation() {
        let mut cube = cuboid(Vec3::splat(8.0), Vec3::splat(2.0));
        let before = cube.signed_volume();
        grid_to_object(&mut cube, 16);
        assert!(cube.signed_volume() > 0.0);
        // Volume scales by (2/16)^3.
        assert!((cube.signed_volume() - before / 512.0).abs() < 1e-4);
    }

    #[test]
    fn test_assemble_orders_and_skips() {
        let f2f = FieldToFragments::default();
        let surface = cuboid(Vec3::ZERO, Vec3::splat(1.0));
        let parts = vec![
            cuboid(Vec3::new(-0.5, 0.0, 0.0), Vec3::splat(0.25)),
            cuboid(Vec3::new(5.0, 0.0, 0.0), Vec3::splat(0.25)),
            cuboid(Vec3::new(0.5, 0.0, 0.0), Vec3::splat(0.25)),
        ];
        let results = f2f.assemble(&parts, &surface, 1);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ComponentSkip::Boolean(_))), "{:?}", results[1]);
        let third = results[2].as_ref().unwrap();
        assert!(third.is_volume());
        assert!(third.bounds().unwrap().0.x > 0.2);
    }

    #[test]
    fn test_assemble_enforces_min_faces() {
        let f2f = FieldToFragments::default().with_max_threads(2);
        let surface = cuboid(Vec3::ZERO, Vec3::splat(2.0));
        let results = f2f.assemble(&[tetrahedron()], &surface, 1000);
        assert!(matches!(results[0], Err(ComponentSkip::TooFewFaces { min_faces: 1000, .. })));
    }

    #[test]
    fn test_segment_sphere_into_one_fragment() {
        let f2f = FieldToFragments::new(Arc::new(OneBasin), Arc::new(BspBoolean));
        let surface = cuboid(Vec3::ZERO, Vec3::splat(0.9));
        let params = SegmentParams::for_fidelity(Fidelity::Low, 1.0).with_min_faces(8);
        let fragments = f2f.segment(&sphere_field(16, 0.5), &surface, &params, None).unwrap();

        assert_eq!(fragments.len(), 1);
        let (min, max) = fragments[0].bounds().unwrap();
        assert!(min.min_element() > -0.8 && max.max_element() < 0.8, "{:?} {:?}", min, max);
        assert!(fragments[0].is_volume());
    }

    #[test]
    fn test_segment_empty_field_yields_no_fragments() {
        let f2f = FieldToFragments::new(Arc::new(OneBasin), Arc::new(BspBoolean));
        let field = VolumetricField::from_fn(16, |_| -1.0);
        let fragments = f2f
            .segment(&field, &tetrahedron(), &SegmentParams::for_fidelity(Fidelity::Low, 1.0), None)
            .unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_backend_errors_propagate() {
        let f2f = FieldToFragments::new(Arc::new(Broken), Arc::new(BspBoolean));
        let err = f2f
            .segment(&sphere_field(8, 0.5), &tetrahedron(), &SegmentParams::for_fidelity(Fidelity::Low, 1.0), None)
            .unwrap_err();
        assert!(matches!(err, SegmentationBackendError::Missing { .. }));
    }

    #[test]
    fn test_segment_writes_outputs() {
        let dir = std::env::temp_dir().join(format!("deepfracture_f2f_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let f2f = FieldToFragments::new(Arc::new(OneBasin), Arc::new(BspBoolean));
        let params = SegmentParams::for_fidelity(Fidelity::Low, 1.0).with_min_faces(8);
        let fragments = f2f
            .segment(&sphere_field(16, 0.5), &cuboid(Vec3::ZERO, Vec3::splat(0.9)), &params, Some(&dir))
            .unwrap();

        assert!(dir.join("imj.nii").exists());
        for n in 1..=fragments.len() {
            assert!(dir.join("objs").join(format!("vol_{}.obj", n)).exists());
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}

mod common;

use deepfracture::field::{grid_index, VolumetricField};
use deepfracture::fracture::{object_to_grid, SegmentParams};
use deepfracture::glam::Vec3;
use deepfracture::{Fidelity, FieldToFragments, FragmentMesh};

const RES: usize = 24;

/// Two overlapping balls: a dumbbell the watershed can split at the neck.
fn dumbbell(p: Vec3) -> f32 {
    let a = 0.35 - (p - Vec3::new(-0.35, 0.0, 0.0)).length();
    let b = 0.35 - (p - Vec3::new(0.35, 0.0, 0.0)).length();
    a.max(b)
}

/// The same shape with its neck on the diagonal plane `x + y = 0`.
fn diagonal_dumbbell(p: Vec3) -> f32 {
    let a = 0.36 - (p - Vec3::new(-0.25, -0.25, 0.0)).length();
    let b = 0.36 - (p - Vec3::new(0.25, 0.25, 0.0)).length();
    a.max(b)
}

fn split(field: &VolumetricField) -> (SegmentParams, Vec<FragmentMesh>) {
    let params = SegmentParams::for_fidelity(Fidelity::Mid, field.max_value())
        .with_min_faces(8)
        .with_noise_threshold(4);
    let surface = common::cuboid(Vec3::ZERO, Vec3::splat(0.95));
    let fragments = FieldToFragments::default()
        .segment(field, &surface, &params, None)
        .unwrap();
    (params, fragments)
}

fn bounds_centre(mesh: &FragmentMesh) -> Vec3 {
    let (lo, hi) = mesh.bounds().unwrap();
    (lo + hi) * 0.5
}

fn assert_inside_mask(field: &VolumetricField, params: &SegmentParams, fragments: &[FragmentMesh]) {
    let mask = field.offset(params.isolevel_bias).interior_mask();
    // Surface extraction plus smoothing may drift up to about two voxels.
    let tolerance = 2i64;
    for (n, fragment) in fragments.iter().enumerate() {
        assert!(fragment.is_volume(), "fragment {} is not a closed volume", n);
        for v in &fragment.vertices {
            let g = object_to_grid(*v, RES);
            let centre = [g.x.round() as i64, g.y.round() as i64, g.z.round() as i64];
            let mut near_interior = false;
            for dx in -tolerance..=tolerance {
                for dy in -tolerance..=tolerance {
                    for dz in -tolerance..=tolerance {
                        let (x, y, z) = (centre[0] + dx, centre[1] + dy, centre[2] + dz);
                        let inside = [x, y, z].iter().all(|&c| c >= 0 && c < RES as i64);
                        if inside && mask[grid_index(RES, x as usize, y as usize, z as usize)] {
                            near_interior = true;
                        }
                    }
                }
            }
            assert!(near_interior, "fragment {} vertex {:?} (grid {:?}) is outside the mask", n, v, g);
        }
    }
}

#[test]
fn test_dumbbell_splits_at_the_neck() {
    let field = VolumetricField::from_fn(RES, dumbbell);
    let (params, fragments) = split(&field);
    assert_eq!(fragments.len(), 2, "one fragment per ball");
    assert_inside_mask(&field, &params, &fragments);

    // One ball on each side of the neck.
    let mut sides: Vec<f32> = fragments.iter().map(|f| bounds_centre(f).x).collect();
    sides.sort_by(f32::total_cmp);
    assert!(sides[0] < -0.1 && sides[1] > 0.1, "fragment centres {:?}", sides);
}

#[test]
fn test_diagonal_neck_splits_too() {
    let field = VolumetricField::from_fn(RES, diagonal_dumbbell);
    let (params, fragments) = split(&field);
    assert_eq!(fragments.len(), 2, "a diagonal dam must keep both balls apart");
    assert_inside_mask(&field, &params, &fragments);

    let mut sides: Vec<f32> = fragments.iter().map(|f| bounds_centre(f).x + bounds_centre(f).y).collect();
    sides.sort_by(f32::total_cmp);
    assert!(sides[0] < -0.2 && sides[1] > 0.2, "fragment centres {:?}", sides);
}

#[test]
fn test_fragments_are_clipped_by_the_surface() {
    let field = VolumetricField::from_fn(RES, |p| 0.7 - p.length());
    let params = SegmentParams::for_fidelity(Fidelity::Mid, field.max_value())
        .with_min_faces(8)
        .with_noise_threshold(4);
    // A thin slab through the ball.
    let surface = common::cuboid(Vec3::ZERO, Vec3::new(0.9, 0.2, 0.9));

    let fragments = FieldToFragments::default()
        .with_max_threads(2)
        .segment(&field, &surface, &params, None)
        .unwrap();
    assert!(!fragments.is_empty());
    for fragment in &fragments {
        let (lo, hi) = fragment.bounds().unwrap();
        assert!(lo.y >= -0.2 - 1e-3 && hi.y <= 0.2 + 1e-3, "fragment escapes the slab: {:?} {:?}", lo, hi);
    }
}

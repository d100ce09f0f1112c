//! Collider shape support functions for collision detection.

use glam::{Mat4, Vec3};

use crate::ecs::components::physics::ColliderShape;
use crate::ecs::components::transform::GlobalTransform;

/// Axis-aligned bounding box for broadphase collision detection.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsAabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl PhysicsAabb {
    #[inline]
    pub fn overlaps(&self, other: &PhysicsAabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

impl ColliderShape {
    /// GJK/EPA support function. Returns the farthest point in the given direction.
    #[inline]
    pub fn support(&self, direction: Vec3, transform: &GlobalTransform) -> Vec3 {
        let mat = transform.0;
        // Rigid transforms: the inverse rotation is the transpose.
        let local_dir = mat.transpose().transform_vector3(direction).normalize_or_zero();

        let local_point = match self {
            ColliderShape::Sphere { radius } => local_dir * *radius,
            ColliderShape::Box { half_extents } => Vec3::select(
                local_dir.cmpge(Vec3::ZERO),
                *half_extents,
                -*half_extents,
            ),
            ColliderShape::ConvexHull { points } => points
                .iter()
                .copied()
                .fold(None, |best: Option<(Vec3, f32)>, p| {
                    let d = p.dot(local_dir);
                    match best {
                        Some((_, bd)) if bd >= d => best,
                        _ => Some((p, d)),
                    }
                })
                .map_or(Vec3::ZERO, |(p, _)| p),
        };

        mat.transform_point3(local_point)
    }

    /// World-space AABB for this shape.
    #[inline]
    pub fn compute_aabb(&self, transform: &GlobalTransform) -> PhysicsAabb {
        let mat = transform.0;
        match self {
            ColliderShape::Sphere { radius } => {
                let center = mat.transform_point3(Vec3::ZERO);
                PhysicsAabb {
                    min: center - Vec3::splat(*radius),
                    max: center + Vec3::splat(*radius),
                }
            }
            ColliderShape::Box { half_extents } => aabb_from_extents(*half_extents, mat),
            ColliderShape::ConvexHull { points } => {
                if points.is_empty() {
                    let center = mat.transform_point3(Vec3::ZERO);
                    return PhysicsAabb {
                        min: center,
                        max: center,
                    };
                }
                let mut min = Vec3::splat(f32::MAX);
                let mut max = Vec3::splat(f32::MIN);
                for p in points {
                    let wp = mat.transform_point3(*p);
                    min = min.min(wp);
                    max = max.max(wp);
                }
                PhysicsAabb { min, max }
            }
        }
    }
}

#[inline]
fn aabb_from_extents(half_extents: Vec3, mat: Mat4) -> PhysicsAabb {
    let center = mat.transform_point3(Vec3::ZERO);
    let extent = mat.x_axis.truncate().abs() * half_extents.x
        + mat.y_axis.truncate().abs() * half_extents.y
        + mat.z_axis.truncate().abs() * half_extents.z;
    PhysicsAabb {
        min: center - extent,
        max: center + extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_sphere_aabb() {
        let shape = ColliderShape::Sphere { radius: 1.0 };
        let transform = GlobalTransform(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));
        let aabb = shape.compute_aabb(&transform);
        assert!((aabb.min - Vec3::new(-1.0, 4.0, -1.0)).length() < 1e-5);
        assert!((aabb.max - Vec3::new(1.0, 6.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_rotated_box_aabb() {
        let shape = ColliderShape::Box {
            half_extents: Vec3::new(2.0, 1.0, 1.0),
        };
        let transform = GlobalTransform(Mat4::from_quat(Quat::from_rotation_z(
            std::f32::consts::FRAC_PI_2,
        )));
        let aabb = shape.compute_aabb(&transform);
        assert!((aabb.max - Vec3::new(1.0, 2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_aabb_overlap() {
        let a = PhysicsAabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let b = PhysicsAabb {
            min: Vec3::splat(0.5),
            max: Vec3::splat(2.0),
        };
        let c = PhysicsAabb {
            min: Vec3::splat(2.0),
            max: Vec3::splat(3.0),
        };
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_hull_support() {
        let shape = ColliderShape::ConvexHull {
            points: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
        };
        let transform = GlobalTransform(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));
        let support = shape.support(Vec3::Y, &transform);
        assert!((support - Vec3::new(0.0, 6.0, 0.0)).length() < 1e-5);
    }
}

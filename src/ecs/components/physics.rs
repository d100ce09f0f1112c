//! Physics components for simulated bodies.

use glam::Vec3;

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyType {
    /// Affected by forces and collisions.
    Dynamic,
    /// Immovable.
    Static,
}

/// Rigid body component.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub body_type: RigidBodyType,
    pub mass: f32,
    /// Diagonal of the body-space inertia tensor.
    pub inertia: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub force_accumulator: Vec3,
    /// Per-step velocity damping (default: 0.0).
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Coefficient of restitution (0.0 - 1.0).
    pub restitution: f32,
    /// Friction coefficient.
    pub friction: f32,
}

impl RigidBody {
    /// A dynamic body with unit-sphere inertia; see [`RigidBody::with_inertia`].
    pub fn new_dynamic(mass: f32) -> Self {
        Self {
            body_type: RigidBodyType::Dynamic,
            mass,
            inertia: Vec3::splat(mass),
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force_accumulator: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            restitution: 0.3,
            friction: 0.5,
        }
    }

    pub fn new_static() -> Self {
        Self {
            body_type: RigidBodyType::Static,
            mass: 0.0,
            inertia: Vec3::ZERO,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force_accumulator: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            restitution: 0.3,
            friction: 0.5,
        }
    }

    pub fn with_inertia(mut self, inertia: Vec3) -> Self {
        self.inertia = inertia;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == RigidBodyType::Dynamic && self.mass > 0.0
    }

    pub fn inverse_mass(&self) -> f32 {
        if self.is_dynamic() {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    pub fn inverse_inertia(&self) -> Vec3 {
        if !self.is_dynamic() {
            return Vec3::ZERO;
        }
        let inv = |i: f32| if i > 0.0 { 1.0 / i } else { 0.0 };
        Vec3::new(inv(self.inertia.x), inv(self.inertia.y), inv(self.inertia.z))
    }
}

/// Collider shape, in body space.
#[derive(Debug, Clone)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    ConvexHull { points: Vec<Vec3> },
}

impl ColliderShape {
    /// Diagonal inertia of a solid of mass `mass`. Hulls use their bounding box.
    pub fn inertia(&self, mass: f32) -> Vec3 {
        let box_inertia = |h: Vec3| {
            let s = h * 2.0;
            Vec3::new(
                s.y * s.y + s.z * s.z,
                s.x * s.x + s.z * s.z,
                s.x * s.x + s.y * s.y,
            ) * (mass / 12.0)
        };
        match self {
            ColliderShape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            ColliderShape::Box { half_extents } => box_inertia(*half_extents),
            ColliderShape::ConvexHull { points } => {
                let (min, max) = points.iter().fold(
                    (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                    |(lo, hi), p| (lo.min(*p), hi.max(*p)),
                );
                if points.is_empty() {
                    Vec3::splat(mass)
                } else {
                    box_inertia((max - min) * 0.5).max(Vec3::splat(1e-6))
                }
            }
        }
    }
}

/// Collision detection component.
#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: ColliderShape,
}

impl Default for Collider {
    fn default() -> Self {
        Self {
            shape: ColliderShape::Sphere { radius: 0.5 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_has_no_inverse_mass() {
        let rb = RigidBody::new_static();
        assert_eq!(rb.inverse_mass(), 0.0);
        assert_eq!(rb.inverse_inertia(), Vec3::ZERO);
        assert!(!rb.is_dynamic());
    }

    #[test]
    fn test_box_inertia() {
        let shape = ColliderShape::Box {
            half_extents: Vec3::splat(0.5),
        };
        let i = shape.inertia(12.0);
        assert!((i - Vec3::splat(2.0)).length() < 1e-5);
    }

    #[test]
    fn test_hull_inertia_matches_bounding_box() {
        let points = vec![Vec3::splat(-0.5), Vec3::splat(0.5), Vec3::new(0.5, -0.5, 0.0)];
        let hull = ColliderShape::ConvexHull { points }.inertia(12.0);
        let cube = ColliderShape::Box {
            half_extents: Vec3::splat(0.5),
        }
        .inertia(12.0);
        assert!((hull - cube).length() < 1e-5);
    }
}

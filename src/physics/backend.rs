//! The physics capability the fracture runtime drives.
//!
//! The runtime only ever talks to a [`PhysicsBackend`]; the bundled
//! [`RigidBodyWorld`](super::RigidBodyWorld) is one implementation.

use glam::{Quat, Vec3};
use thiserror::Error;

use crate::fracture::ImpactEvent;

/// Opaque handle of a body inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyId(pub u64);

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Collision shape of a new body, in body space.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyShape {
    /// Convex hull of mesh vertices.
    Hull(Vec<Vec3>),
    Sphere { radius: f32 },
    Cuboid { half_extents: Vec3 },
}

/// Everything needed to create a body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub shape: BodyShape,
    /// Ignored for static bodies.
    pub mass: f32,
    pub is_static: bool,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// `None` keeps the backend default.
    pub friction: Option<f32>,
    /// `None` keeps the backend default.
    pub restitution: Option<f32>,
}

impl BodyDesc {
    pub fn dynamic(shape: BodyShape, mass: f32) -> Self {
        Self {
            shape,
            mass,
            is_static: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            friction: None,
            restitution: None,
        }
    }

    pub fn fixed(shape: BodyShape) -> Self {
        Self {
            is_static: true,
            mass: 0.0,
            ..Self::dynamic(shape, 0.0)
        }
    }

    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    pub fn with_material(mut self, friction: Option<f32>, restitution: Option<f32>) -> Self {
        self.friction = friction;
        self.restitution = restitution;
        self
    }
}

/// Pose and velocities of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("unknown body {0}")]
    UnknownBody(BodyId),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("physics backend error: {0}")]
    Backend(String),
}

/// A rigid-body simulation.
pub trait PhysicsBackend {
    fn create_body(&mut self, desc: &BodyDesc) -> Result<BodyId, PhysicsError>;

    fn remove_body(&mut self, id: BodyId) -> Result<(), PhysicsError>;

    fn contains(&self, id: BodyId) -> bool;

    fn body_state(&self, id: BodyId) -> Result<BodyState, PhysicsError>;

    fn set_pose(&mut self, id: BodyId, position: Vec3, rotation: Quat) -> Result<(), PhysicsError>;

    fn set_velocity(&mut self, id: BodyId, linear: Vec3, angular: Vec3) -> Result<(), PhysicsError>;

    fn mass(&self, id: BodyId) -> Result<f32, PhysicsError>;

    /// Advance the simulation by `dt` seconds.
    fn step(&mut self, dt: f32);

    /// Contacts produced by the last [`step`](PhysicsBackend::step), over all
    /// of its substeps.
    fn contacts(&self) -> Vec<ImpactEvent>;

    fn set_gravity(&mut self, gravity: Vec3);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_builders() {
        let desc = BodyDesc::dynamic(BodyShape::Sphere { radius: 1.0 }, 2.0)
            .with_pose(Vec3::Y, Quat::IDENTITY)
            .with_velocity(Vec3::X, Vec3::Z)
            .with_material(Some(0.1), None);
        assert!(!desc.is_static);
        assert_eq!(desc.mass, 2.0);
        assert_eq!(desc.position, Vec3::Y);
        assert_eq!(desc.angular_velocity, Vec3::Z);
        assert_eq!(desc.friction, Some(0.1));
        assert_eq!(desc.restitution, None);

        let ground = BodyDesc::fixed(BodyShape::Cuboid {
            half_extents: Vec3::ONE,
        });
        assert!(ground.is_static);
        assert_eq!(ground.mass, 0.0);
    }
}

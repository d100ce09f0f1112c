//! Rigid body simulation behind the [`PhysicsBackend`] capability.
//!
//! # Architecture
//!
//! [`RigidBodyWorld`] stores bodies as hecs entities and advances them with
//! [`PhysicsWorld`], which runs each fixed substep as:
//!
//! 1. Apply forces (gravity)
//! 2. Integrate velocities
//! 3. Broadphase collision detection (sweep and prune)
//! 4. Narrowphase collision detection (GJK/EPA, SAT, sphere tests)
//! 5. Solve contact constraints (sequential impulse)
//! 6. Report contacts with their accumulated normal impulse
//! 7. Integrate positions, synchronize transforms, clear forces

mod backend;

pub use backend::{BodyDesc, BodyId, BodyShape, BodyState, PhysicsBackend, PhysicsError};

#[cfg(feature = "physics")]
pub mod broadphase;
#[cfg(feature = "physics")]
pub mod collider;
#[cfg(feature = "physics")]
pub mod contact;
#[cfg(feature = "physics")]
pub mod narrowphase;
#[cfg(feature = "physics")]
pub mod rigid_body;
#[cfg(feature = "physics")]
pub mod solver;
#[cfg(feature = "physics")]
mod world;

#[cfg(feature = "physics")]
pub use world::RigidBodyWorld;

#[cfg(feature = "physics")]
use self::{
    broadphase::SweepAndPrune,
    contact::{ContactManifold, ContactPoint},
    narrowphase::detect_collision,
};
#[cfg(feature = "physics")]
use crate::ecs::components::{physics::Collider, transform::GlobalTransform};
#[cfg(feature = "physics")]
use crate::fracture::ImpactEvent;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Configuration for the physics simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed substeps per [`PhysicsBackend::step`]. Default: 1.
    pub substeps: u32,
    /// Number of constraint solver iterations. Default: 8.
    pub solver_iterations: u32,
    /// Friction of bodies created without one. Default: 0.5.
    pub default_friction: f32,
    /// Restitution of bodies created without one. Default: 0.3.
    pub default_restitution: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            substeps: 1,
            solver_iterations: 8,
            default_friction: 0.5,
            default_restitution: 0.3,
        }
    }
}

/// The stepping pipeline shared by every hecs-backed world.
#[cfg(feature = "physics")]
pub struct PhysicsWorld {
    config: PhysicsConfig,
    broadphase: SweepAndPrune,
    manifolds: Vec<ContactManifold>,
    impacts: Vec<ImpactEvent>,
}

#[cfg(feature = "physics")]
impl PhysicsWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            config,
            broadphase: SweepAndPrune::new(),
            manifolds: Vec::new(),
            impacts: Vec::new(),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
    }

    /// Contacts of the last [`step`](Self::step), over all substeps.
    pub fn impacts(&self) -> &[ImpactEvent] {
        &self.impacts
    }

    /// Advance by `delta_time` in `substeps` equal fixed steps.
    pub fn step(&mut self, world: &mut hecs::World, delta_time: f32) {
        self.impacts.clear();
        let substeps = self.config.substeps.max(1);
        let dt = delta_time / substeps as f32;
        if dt <= 0.0 {
            return;
        }
        for _ in 0..substeps {
            self.fixed_step(world, dt);
        }
    }

    fn fixed_step(&mut self, world: &mut hecs::World, dt: f32) {
        rigid_body::apply_gravity(world, self.config.gravity);
        rigid_body::integrate_velocities(world, dt);

        let pairs = self.broadphase.find_pairs(world);

        self.manifolds.clear();
        for (entity_a, entity_b) in pairs {
            let contact = {
                let colliders = (
                    world.get::<&Collider>(entity_a),
                    world.get::<&Collider>(entity_b),
                    world.get::<&GlobalTransform>(entity_a),
                    world.get::<&GlobalTransform>(entity_b),
                );
                match colliders {
                    (Ok(ca), Ok(cb), Ok(ta), Ok(tb)) => detect_collision(&ca.shape, &ta, &cb.shape, &tb),
                    _ => None,
                }
            };
            if let Some(info) = contact {
                self.manifolds.push(ContactManifold {
                    entity_a,
                    entity_b,
                    normal: info.normal,
                    contacts: vec![ContactPoint {
                        position: info.point,
                        penetration: info.penetration,
                        normal_impulse: 0.0,
                    }],
                });
            }
        }

        solver::solve_contacts(&mut self.manifolds, world, self.config.solver_iterations, dt);

        for manifold in &self.manifolds {
            let (a, b) = (
                BodyId(manifold.entity_a.to_bits().get()),
                BodyId(manifold.entity_b.to_bits().get()),
            );
            for point in &manifold.contacts {
                // Normal on B pointing toward A.
                self.impacts
                    .push(ImpactEvent::new(a, b, point.position, -manifold.normal, point.normal_impulse));
            }
        }

        rigid_body::integrate_positions(world, dt);
        rigid_body::sync_transforms(world);
        rigid_body::clear_forces(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physics_config_default() {
        let config = PhysicsConfig::default();
        assert_eq!(config.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert_eq!(config.substeps, 1);
        assert_eq!(config.solver_iterations, 8);
    }

    #[test]
    fn test_physics_config_from_json() {
        let config: PhysicsConfig = serde_json::from_str(r#"{"substeps": 4}"#).unwrap();
        assert_eq!(config.substeps, 4);
        assert_eq!(config.default_friction, 0.5);
    }
}

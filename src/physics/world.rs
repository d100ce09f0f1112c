use glam::{Quat, Vec3};

use super::{BodyDesc, BodyId, BodyShape, BodyState, PhysicsBackend, PhysicsConfig, PhysicsError, PhysicsWorld};
use crate::ecs::components::physics::{Collider, ColliderShape, RigidBody};
use crate::ecs::components::transform::{GlobalTransform, Transform};
use crate::fracture::ImpactEvent;

/// The bundled [`PhysicsBackend`]: bodies are hecs entities, handles are
/// entity bits.
pub struct RigidBodyWorld {
    world: hecs::World,
    physics: PhysicsWorld,
}

impl RigidBodyWorld {
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            world: hecs::World::new(),
            physics: PhysicsWorld::new(config),
        }
    }

    pub fn world(&self) -> &hecs::World {
        &self.world
    }

    pub fn config(&self) -> &PhysicsConfig {
        self.physics.config()
    }

    pub fn body_count(&self) -> usize {
        self.world.len() as usize
    }

    fn entity(&self, id: BodyId) -> Result<hecs::Entity, PhysicsError> {
        hecs::Entity::from_bits(id.0)
            .filter(|e| self.world.contains(*e))
            .ok_or(PhysicsError::UnknownBody(id))
    }
}

impl Default for RigidBodyWorld {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

fn collider_shape(shape: &BodyShape) -> Result<ColliderShape, PhysicsError> {
    match shape {
        BodyShape::Hull(points) => {
            if points.len() < 4 {
                return Err(PhysicsError::InvalidBody(format!(
                    "convex hull needs at least 4 points, got {}",
                    points.len()
                )));
            }
            if points.iter().any(|p| !p.is_finite()) {
                return Err(PhysicsError::InvalidBody("non-finite hull point".into()));
            }
            Ok(ColliderShape::ConvexHull {
                points: points.clone(),
            })
        }
        BodyShape::Sphere { radius } if *radius > 0.0 => Ok(ColliderShape::Sphere { radius: *radius }),
        BodyShape::Cuboid { half_extents } if half_extents.min_element() > 0.0 => Ok(ColliderShape::Box {
            half_extents: *half_extents,
        }),
        other => Err(PhysicsError::InvalidBody(format!("degenerate shape {:?}", other))),
    }
}

impl PhysicsBackend for RigidBodyWorld {
    fn create_body(&mut self, desc: &BodyDesc) -> Result<BodyId, PhysicsError> {
        let shape = collider_shape(&desc.shape)?;
        let mut rb = if desc.is_static {
            RigidBody::new_static()
        } else {
            if !(desc.mass > 0.0 && desc.mass.is_finite()) {
                return Err(PhysicsError::InvalidBody(format!(
                    "dynamic body needs a positive mass, got {}",
                    desc.mass
                )));
            }
            let mut rb = RigidBody::new_dynamic(desc.mass).with_inertia(shape.inertia(desc.mass));
            rb.linear_velocity = desc.linear_velocity;
            rb.angular_velocity = desc.angular_velocity;
            rb
        };
        let config = self.physics.config();
        rb.friction = desc.friction.unwrap_or(config.default_friction);
        rb.restitution = desc.restitution.unwrap_or(config.default_restitution);

        let transform = Transform::from_pose(desc.position, desc.rotation.normalize());
        let entity = self
            .world
            .spawn((transform, GlobalTransform::from(transform), rb, Collider { shape }));
        Ok(BodyId(entity.to_bits().get()))
    }

    fn remove_body(&mut self, id: BodyId) -> Result<(), PhysicsError> {
        let entity = self.entity(id)?;
        self.world
            .despawn(entity)
            .map_err(|_| PhysicsError::UnknownBody(id))
    }

    fn contains(&self, id: BodyId) -> bool {
        self.entity(id).is_ok()
    }

    fn body_state(&self, id: BodyId) -> Result<BodyState, PhysicsError> {
        let entity = self.entity(id)?;
        let transform = self
            .world
            .get::<&Transform>(entity)
            .map_err(|_| PhysicsError::UnknownBody(id))?;
        let rb = self
            .world
            .get::<&RigidBody>(entity)
            .map_err(|_| PhysicsError::UnknownBody(id))?;
        Ok(BodyState {
            position: transform.position,
            rotation: transform.rotation,
            linear_velocity: rb.linear_velocity,
            angular_velocity: rb.angular_velocity,
        })
    }

    fn set_pose(&mut self, id: BodyId, position: Vec3, rotation: Quat) -> Result<(), PhysicsError> {
        let entity = self.entity(id)?;
        let (transform, global) = self
            .world
            .query_one_mut::<(&mut Transform, &mut GlobalTransform)>(entity)
            .map_err(|_| PhysicsError::UnknownBody(id))?;
        *transform = Transform::from_pose(position, rotation.normalize());
        *global = GlobalTransform::from(*transform);
        Ok(())
    }

    fn set_velocity(&mut self, id: BodyId, linear: Vec3, angular: Vec3) -> Result<(), PhysicsError> {
        let entity = self.entity(id)?;
        let mut rb = self
            .world
            .get::<&mut RigidBody>(entity)
            .map_err(|_| PhysicsError::UnknownBody(id))?;
        if rb.is_dynamic() {
            rb.linear_velocity = linear;
            rb.angular_velocity = angular;
        }
        Ok(())
    }

    fn mass(&self, id: BodyId) -> Result<f32, PhysicsError> {
        let entity = self.entity(id)?;
        self.world
            .get::<&RigidBody>(entity)
            .map(|rb| rb.mass)
            .map_err(|_| PhysicsError::UnknownBody(id))
    }

    fn step(&mut self, dt: f32) {
        self.physics.step(&mut self.world, dt);
    }

    fn contacts(&self) -> Vec<ImpactEvent> {
        self.physics.impacts().to_vec()
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.physics.set_gravity(gravity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground() -> BodyDesc {
        BodyDesc::fixed(BodyShape::Cuboid {
            half_extents: Vec3::new(50.0, 0.5, 50.0),
        })
        .with_pose(Vec3::new(0.0, -0.5, 0.0), Quat::IDENTITY)
    }

    #[test]
    fn test_create_and_remove() {
        let mut world = RigidBodyWorld::default();
        let id = world
            .create_body(&BodyDesc::dynamic(BodyShape::Sphere { radius: 0.5 }, 3.0))
            .unwrap();
        assert!(world.contains(id));
        assert_eq!(world.mass(id).unwrap(), 3.0);

        world.remove_body(id).unwrap();
        assert!(!world.contains(id));
        assert_eq!(world.remove_body(id), Err(PhysicsError::UnknownBody(id)));
        assert!(world.body_state(id).is_err());
    }

    #[test]
    fn test_rejects_invalid_bodies() {
        let mut world = RigidBodyWorld::default();
        assert!(world
            .create_body(&BodyDesc::dynamic(BodyShape::Sphere { radius: 0.5 }, 0.0))
            .is_err());
        assert!(world
            .create_body(&BodyDesc::dynamic(BodyShape::Hull(vec![Vec3::ZERO; 3]), 1.0))
            .is_err());
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn test_falling_box_reports_ground_contact() {
        let mut world = RigidBodyWorld::default();
        let floor = world.create_body(&ground()).unwrap();
        let cube = world
            .create_body(
                &BodyDesc::dynamic(
                    BodyShape::Cuboid {
                        half_extents: Vec3::splat(0.5),
                    },
                    1.0,
                )
                .with_pose(Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY),
            )
            .unwrap();

        let mut saw_contact = false;
        for _ in 0..240 {
            world.step(1.0 / 120.0);
            for c in world.contacts() {
                assert!(c.involves(floor) && c.involves(cube));
                assert!(c.impulse_magnitude >= 0.0);
                saw_contact = true;
            }
        }
        assert!(saw_contact);

        let state = world.body_state(cube).unwrap();
        assert!(
            state.position.y > 0.2 && state.position.y < 0.8,
            "cube should rest on the floor: y = {}",
            state.position.y
        );
    }

    #[test]
    fn test_pose_and_velocity_overrides() {
        let mut world = RigidBodyWorld::default();
        let id = world
            .create_body(&BodyDesc::dynamic(BodyShape::Sphere { radius: 0.5 }, 1.0))
            .unwrap();
        let rotation = Quat::from_rotation_x(0.3);
        world.set_pose(id, Vec3::new(1.0, 2.0, 3.0), rotation).unwrap();
        world.set_velocity(id, Vec3::X, Vec3::Y).unwrap();

        let state = world.body_state(id).unwrap();
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(state.rotation.angle_between(rotation) < 1e-5);
        assert_eq!(state.linear_velocity, Vec3::X);
        assert_eq!(state.angular_velocity, Vec3::Y);
    }

    #[test]
    fn test_zero_gravity() {
        let mut world = RigidBodyWorld::default();
        world.set_gravity(Vec3::ZERO);
        let id = world
            .create_body(
                &BodyDesc::dynamic(BodyShape::Sphere { radius: 0.5 }, 1.0)
                    .with_velocity(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO),
            )
            .unwrap();
        world.step(0.5);
        let state = world.body_state(id).unwrap();
        assert!((state.position - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-5);
    }
}

//! Rigid body integration functions.

use glam::{Quat, Vec3};

use crate::ecs::components::physics::RigidBody;
use crate::ecs::components::transform::{GlobalTransform, Transform};

/// Apply gravity force to all dynamic rigid bodies.
pub fn apply_gravity(world: &mut hecs::World, gravity: Vec3) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        if rb.is_dynamic() {
            rb.force_accumulator += gravity * rb.mass;
        }
    }
}

/// Semi-implicit Euler: v += (F/m) * dt, then damping.
pub fn integrate_velocities(world: &mut hecs::World, dt: f32) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        if !rb.is_dynamic() {
            continue;
        }
        rb.linear_velocity += rb.force_accumulator * rb.inverse_mass() * dt;
        rb.linear_velocity *= (1.0 - rb.linear_damping).max(0.0);
        rb.angular_velocity *= (1.0 - rb.angular_damping).max(0.0);
    }
}

/// p += v * dt, q += 0.5 * omega * q * dt.
pub fn integrate_positions(world: &mut hecs::World, dt: f32) {
    for (_, (rb, transform)) in world.query_mut::<(&RigidBody, &mut Transform)>() {
        if !rb.is_dynamic() {
            continue;
        }
        transform.position += rb.linear_velocity * dt;

        let omega = rb.angular_velocity;
        if omega.length_squared() > 1e-10 {
            let q_dot = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0) * transform.rotation * 0.5;
            transform.rotation = Quat::from_xyzw(
                transform.rotation.x + q_dot.x * dt,
                transform.rotation.y + q_dot.y * dt,
                transform.rotation.z + q_dot.z * dt,
                transform.rotation.w + q_dot.w * dt,
            )
            .normalize();
        }
    }
}

/// Refresh every `GlobalTransform` from its `Transform`.
pub fn sync_transforms(world: &mut hecs::World) {
    for (_, (transform, global)) in world.query_mut::<(&Transform, &mut GlobalTransform)>() {
        global.0 = transform.to_matrix();
    }
}

pub fn clear_forces(world: &mut hecs::World) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        rb.force_accumulator = Vec3::ZERO;
    }
}

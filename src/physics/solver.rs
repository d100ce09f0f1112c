//! Sequential impulse constraint solver.

use glam::Vec3;

use crate::ecs::components::physics::RigidBody;
use crate::ecs::components::transform::Transform;

use super::contact::ContactManifold;

/// Baumgarte stabilization parameter.
const BAUMGARTE_BETA: f32 = 0.2;
/// Penetration slop (allowed penetration before position correction).
const PENETRATION_SLOP: f32 = 0.005;

/// Solver view of one body.
#[derive(Debug, Clone, Copy)]
struct BodyView {
    inv_mass: f32,
    inv_inertia: Vec3,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    position: Vec3,
    restitution: f32,
    friction: f32,
}

impl BodyView {
    fn read(world: &hecs::World, entity: hecs::Entity) -> Option<Self> {
        let rb = world.get::<&RigidBody>(entity).ok()?;
        let transform = world.get::<&Transform>(entity).ok()?;
        Some(Self {
            inv_mass: rb.inverse_mass(),
            inv_inertia: rb.inverse_inertia(),
            linear_velocity: rb.linear_velocity,
            angular_velocity: rb.angular_velocity,
            position: transform.position,
            restitution: rb.restitution,
            friction: rb.friction,
        })
    }

    fn velocity_at(&self, r: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    fn effective_inv_mass(&self, r: Vec3, axis: Vec3) -> f32 {
        let rc = r.cross(axis);
        self.inv_mass + (self.inv_inertia * rc).dot(rc)
    }

    fn apply(&mut self, impulse: Vec3, r: Vec3) {
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia * r.cross(impulse);
    }

    fn write(&self, world: &mut hecs::World, entity: hecs::Entity) {
        if self.inv_mass == 0.0 {
            return;
        }
        if let Ok(mut rb) = world.get::<&mut RigidBody>(entity) {
            rb.linear_velocity = self.linear_velocity;
            rb.angular_velocity = self.angular_velocity;
        }
    }
}

/// Solve contact constraints using sequential impulse iteration.
///
/// Accumulated normal impulses are left in the manifolds.
pub fn solve_contacts(manifolds: &mut [ContactManifold], world: &mut hecs::World, iterations: u32, dt: f32) {
    for _ in 0..iterations {
        for manifold in manifolds.iter_mut() {
            solve_manifold(manifold, world, dt);
        }
    }
}

fn solve_manifold(manifold: &mut ContactManifold, world: &mut hecs::World, dt: f32) {
    let (Some(mut a), Some(mut b)) = (
        BodyView::read(world, manifold.entity_a),
        BodyView::read(world, manifold.entity_b),
    ) else {
        return;
    };
    if a.inv_mass == 0.0 && b.inv_mass == 0.0 {
        return;
    }

    let normal = manifold.normal;
    let restitution = (a.restitution + b.restitution) * 0.5;
    let friction = (a.friction + b.friction) * 0.5;

    for contact in &mut manifold.contacts {
        let r_a = contact.position - a.position;
        let r_b = contact.position - b.position;

        let contact_velocity = (b.velocity_at(r_b) - a.velocity_at(r_a)).dot(normal);
        let k = a.effective_inv_mass(r_a, normal) + b.effective_inv_mass(r_b, normal);
        if k <= 0.0 {
            continue;
        }

        let bias = BAUMGARTE_BETA / dt * (contact.penetration - PENETRATION_SLOP).max(0.0);
        let j = (-(1.0 + restitution) * contact_velocity + bias) / k;

        let old = contact.normal_impulse;
        contact.normal_impulse = (old + j).max(0.0);
        let impulse = normal * (contact.normal_impulse - old);
        a.apply(-impulse, r_a);
        b.apply(impulse, r_b);

        // Coulomb friction against the remaining tangential slip.
        let relative = b.velocity_at(r_b) - a.velocity_at(r_a);
        let tangent_velocity = relative - normal * relative.dot(normal);
        let slip = tangent_velocity.length();
        if slip > 1e-6 {
            let tangent = tangent_velocity / slip;
            let kt = a.effective_inv_mass(r_a, tangent) + b.effective_inv_mass(r_b, tangent);
            if kt > 0.0 {
                let max_friction = friction * contact.normal_impulse;
                let jt = (-slip / kt).clamp(-max_friction, max_friction);
                a.apply(-tangent * jt, r_a);
                b.apply(tangent * jt, r_b);
            }
        }
    }

    a.write(world, manifold.entity_a);
    b.write(world, manifold.entity_b);
}

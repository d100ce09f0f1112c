//! Broadphase collision detection using AABB overlap tests.

use crate::ecs::components::physics::{Collider, RigidBody};
use crate::ecs::components::transform::GlobalTransform;

use super::collider::PhysicsAabb;

/// Sweep-and-prune along the x axis.
#[derive(Debug, Default)]
pub struct SweepAndPrune {
    entries: Vec<(hecs::Entity, PhysicsAabb, bool)>,
}

impl SweepAndPrune {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pairs of entities whose AABBs overlap and at least one of which
    /// is dynamic. Pairs come out in a deterministic order.
    pub fn find_pairs(&mut self, world: &hecs::World) -> Vec<(hecs::Entity, hecs::Entity)> {
        self.entries.clear();
        for (entity, (collider, transform, rb)) in world
            .query::<(&Collider, &GlobalTransform, &RigidBody)>()
            .iter()
        {
            let aabb = collider.shape.compute_aabb(transform);
            self.entries.push((entity, aabb, rb.is_dynamic()));
        }
        self.entries.sort_by(|a, b| {
            a.1.min
                .x
                .total_cmp(&b.1.min.x)
                .then_with(|| a.0.to_bits().cmp(&b.0.to_bits()))
        });

        let mut pairs = Vec::new();
        for i in 0..self.entries.len() {
            let (entity_a, aabb_a, dynamic_a) = self.entries[i];
            for &(entity_b, aabb_b, dynamic_b) in &self.entries[i + 1..] {
                if aabb_b.min.x > aabb_a.max.x {
                    break;
                }
                if !dynamic_a && !dynamic_b {
                    continue;
                }
                if aabb_a.overlaps(&aabb_b) {
                    pairs.push((entity_a, entity_b));
                }
            }
        }
        pairs
    }
}

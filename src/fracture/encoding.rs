//! Impact encoding in the struck object's frame.

use glam::{Quat, Vec3};

use super::ImpactEvent;
use crate::physics::BodyId;

/// Map an impulse to `[-1, 1]`, saturating at `impulse_max`.
pub fn normalize_impulse(impulse: f32, impulse_max: f32) -> f32 {
    if impulse_max.is_nan() || impulse_max <= 0.0 {
        return 1.0;
    }
    impulse.max(0.0).min(impulse_max) / impulse_max * 2.0 - 1.0
}

/// One encoded impact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactSlot {
    /// Contact point in object space.
    pub position: Vec3,
    /// Unit direction in object space, or zero.
    pub direction: Vec3,
    /// Normalised impulse in `[-1, 1]`.
    pub impulse: f32,
}

impl ImpactSlot {
    /// Filler for missing impacts.
    pub const EMPTY: Self = Self {
        position: Vec3::ZERO,
        direction: Vec3::ZERO,
        impulse: 0.0,
    };

    /// Encode `event` as seen by `object` posed at `(position, rotation)`.
    pub fn from_event(
        event: &ImpactEvent,
        object: BodyId,
        position: Vec3,
        rotation: Quat,
        impulse_max: f32,
    ) -> Self {
        let inverse = rotation.normalize().inverse();
        let normal = if event.body_b_id == object {
            event.contact_normal
        } else {
            -event.contact_normal
        };
        Self {
            position: inverse * (event.position - position),
            direction: (inverse * normal).normalize_or_zero(),
            impulse: normalize_impulse(event.impulse_magnitude, impulse_max),
        }
    }
}

/// The encoder input for one fracture decision: a fixed number of slots,
/// strongest impact first.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionEncoding {
    slots: Vec<ImpactSlot>,
}

impl CollisionEncoding {
    /// Encode the first `collision_num` of `events` (sorted strongest
    /// first), zero-filling missing slots.
    pub fn from_events(
        events: &[ImpactEvent],
        object: BodyId,
        position: Vec3,
        rotation: Quat,
        collision_num: usize,
        impulse_max: f32,
    ) -> Self {
        let slots = (0..collision_num)
            .map(|i| match events.get(i) {
                Some(event) => ImpactSlot::from_event(event, object, position, rotation, impulse_max),
                None => ImpactSlot::EMPTY,
            })
            .collect();
        Self { slots }
    }

    pub fn from_slots(slots: Vec<ImpactSlot>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[ImpactSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Flat position, direction and impulse vectors for the encoder.
    pub fn to_vectors(&self) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let positions = self.slots.iter().flat_map(|s| s.position.to_array()).collect();
        let directions = self.slots.iter().flat_map(|s| s.direction.to_array()).collect();
        let impulses = self.slots.iter().map(|s| s.impulse).collect();
        (positions, directions, impulses)
    }
}

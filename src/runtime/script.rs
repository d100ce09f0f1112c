//! Recorded impacts for offline prediction.
//!
//! A script is a JSON array of
//! `{"collImpulse": f, "collDirections": [x, y, z], "collPoints": [x, y, z]}`
//! with points and directions already in object space.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::fracture::{normalize_impulse, CollisionEncoding, ImpactSlot};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptedImpact {
    #[serde(rename = "collImpulse")]
    pub impulse: f32,
    #[serde(rename = "collDirections")]
    pub direction: Vec3,
    #[serde(rename = "collPoints")]
    pub point: Vec3,
}

/// A recorded sequence of impacts.
///
/// Replayed impulses go through [`normalize_impulse`] exactly like live
/// contacts, so a script and the same impact seen in simulation encode to
/// the same slot. Scripts recorded with a `collImpulse / (0.1 * impulse_max)`
/// scaling have to be converted back to raw impulses before replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImpactScript {
    pub impacts: Vec<ScriptedImpact>,
}

impl ImpactScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The impact with the largest impulse; the first one on ties.
    pub fn strongest(&self) -> Option<&ScriptedImpact> {
        self.impacts.iter().fold(None, |best, impact| match best {
            Some(b) if b.impulse >= impact.impulse => Some(b),
            _ => Some(impact),
        })
    }

    /// One-slot encoding of the strongest impact, zero-filled to
    /// `collision_num` slots.
    pub fn encoding(&self, collision_num: usize, impulse_max: f32) -> Option<CollisionEncoding> {
        let strongest = self.strongest()?;
        let mut slots = vec![ImpactSlot::EMPTY; collision_num.max(1)];
        slots[0] = ImpactSlot {
            position: strongest.point,
            direction: strongest.direction.normalize_or_zero(),
            impulse: normalize_impulse(strongest.impulse, impulse_max),
        };
        Some(CollisionEncoding::from_slots(slots))
    }
}

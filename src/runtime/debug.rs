//! Caller-owned controls polled by the loop.

use glam::{Quat, Vec3};

use super::quat_from_euler;

/// A pending pose and velocity reset for one intact object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseOverride {
    /// Registration index of the object.
    pub object: usize,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
}

impl PoseOverride {
    /// Override from `(roll, pitch, yaw)` in radians.
    pub fn from_euler(object: usize, position: Vec3, euler: Vec3, linear_velocity: Vec3) -> Self {
        Self {
            object,
            position,
            rotation: quat_from_euler(euler),
            linear_velocity,
        }
    }
}

/// Polled once per step, before the backend is stepped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugControlState {
    /// Consumed by the next step.
    pub pose_override: Option<PoseOverride>,
    /// Consumed by the next step; switches mesh export on or off.
    pub export_enabled: Option<bool>,
}

impl DebugControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pose(&mut self, pose: PoseOverride) {
        self.pose_override = Some(pose);
    }

    pub fn set_export(&mut self, enabled: bool) {
        self.export_enabled = Some(enabled);
    }

    pub(crate) fn take(&mut self) -> (Option<PoseOverride>, Option<bool>) {
        (self.pose_override.take(), self.export_enabled.take())
    }
}

//! Breakable objects and their fracture lifecycle.

use std::path::PathBuf;

use glam::{Quat, Vec3};

use crate::mesh::FragmentMesh;
use crate::model::{Fidelity, ShapeId};
use crate::physics::{BodyDesc, BodyId, BodyShape};

/// Lifecycle of a breakable object. `Fragmented` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FractureState {
    Intact,
    Fracturing,
    Fragmented,
}

impl FractureState {
    pub fn is_terminal(self) -> bool {
        self == FractureState::Fragmented
    }
}

/// Pose and velocity captured when a fracture triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractureFrame {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

/// Everything needed to spawn a breakable object.
#[derive(Debug, Clone)]
pub struct ObjectDesc {
    pub name: String,
    /// Closed surface in object space, also the collision hull.
    pub surface: FragmentMesh,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: f32,
    pub friction: Option<f32>,
    pub restitution: Option<f32>,
    /// Static objects are fixed in the world and never fracture.
    pub is_static: bool,
    /// Precomputed fragments in object space. Empty means predict on demand.
    pub fragments: Vec<FragmentMesh>,
    pub shape: Option<ShapeId>,
    pub fidelity: Fidelity,
    /// Normalisation of the segmentation isolevel.
    pub max_value: f32,
    /// Where prediction diagnostics and fragment files go.
    pub work_dir: Option<PathBuf>,
}

impl ObjectDesc {
    pub fn new(name: impl Into<String>, surface: FragmentMesh, mass: f32) -> Self {
        Self {
            name: name.into(),
            surface,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass,
            friction: None,
            restitution: None,
            is_static: false,
            fragments: Vec::new(),
            shape: None,
            fidelity: Fidelity::Mid,
            max_value: 1.0,
            work_dir: None,
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

    pub fn with_fragments(mut self, fragments: Vec<FragmentMesh>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Backend description of the intact body.
    pub fn body_desc(&self) -> BodyDesc {
        let shape = BodyShape::Hull(self.surface.vertices.clone());
        let desc = if self.is_static {
            BodyDesc::fixed(shape)
        } else {
            BodyDesc::dynamic(shape, self.mass).with_velocity(self.linear_velocity, self.angular_velocity)
        };
        desc.with_pose(self.position, self.rotation)
            .with_material(self.friction, self.restitution)
    }
}

/// A rigid body that may be swapped for its fragments.
///
/// Only the orchestrator mutates these.
#[derive(Debug, Clone)]
pub struct BreakableObject {
    desc: ObjectDesc,
    body: BodyId,
    fragment_bodies: Vec<BodyId>,
    last_linear_velocity: Vec3,
    last_angular_velocity: Vec3,
    state: FractureState,
    has_fractured: bool,
    history: Vec<(u64, FractureState)>,
}

impl BreakableObject {
    pub(crate) fn new(mut desc: ObjectDesc, body: BodyId) -> Self {
        let (linear, angular) = (desc.linear_velocity, desc.angular_velocity);
        if desc.is_static {
            desc.fragments.clear();
        }
        Self {
            desc,
            body,
            fragment_bodies: Vec::new(),
            last_linear_velocity: linear,
            last_angular_velocity: angular,
            state: FractureState::Intact,
            has_fractured: false,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn desc(&self) -> &ObjectDesc {
        &self.desc
    }

    /// The intact body. Removed from the backend once fragmented.
    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn fragment_bodies(&self) -> &[BodyId] {
        &self.fragment_bodies
    }

    pub fn fragments(&self) -> &[FragmentMesh] {
        &self.desc.fragments
    }

    pub fn state(&self) -> FractureState {
        self.state
    }

    pub fn is_static(&self) -> bool {
        self.desc.is_static
    }

    pub fn has_fractured(&self) -> bool {
        self.has_fractured
    }

    pub fn mass(&self) -> f32 {
        self.desc.mass
    }

    pub fn last_velocity(&self) -> (Vec3, Vec3) {
        (self.last_linear_velocity, self.last_angular_velocity)
    }

    /// State changes as `(step, new state)`.
    pub fn history(&self) -> &[(u64, FractureState)] {
        &self.history
    }

    /// Bodies that currently represent the object, with their meshes.
    pub fn active_parts(&self) -> Vec<(BodyId, &FragmentMesh)> {
        match self.state {
            FractureState::Fragmented => self
                .fragment_bodies
                .iter()
                .copied()
                .zip(&self.desc.fragments)
                .collect(),
            _ => vec![(self.body, &self.desc.surface)],
        }
    }

    pub(crate) fn set_last_velocity(&mut self, linear: Vec3, angular: Vec3) {
        self.last_linear_velocity = linear;
        self.last_angular_velocity = angular;
    }

    pub(crate) fn set_fragments(&mut self, fragments: Vec<FragmentMesh>) {
        self.desc.fragments = fragments;
    }

    pub(crate) fn transition(&mut self, step: u64, state: FractureState) {
        debug_assert!(!self.state.is_terminal(), "{} is already fragmented", self.desc.name);
        self.state = state;
        self.history.push((step, state));
    }

    pub(crate) fn commit_fragments(&mut self, step: u64, bodies: Vec<BodyId>) {
        self.fragment_bodies = bodies;
        self.has_fractured = true;
        self.transition(step, FractureState::Fragmented);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_shapes::{cuboid, tetrahedron};

    #[test]
    fn test_body_desc() {
        let desc = ObjectDesc::new("cube", cuboid(Vec3::ZERO, Vec3::ONE), 4.0)
            .with_pose(Vec3::Y, Quat::IDENTITY)
            .with_velocity(Vec3::X, Vec3::ZERO);
        let body = desc.body_desc();
        assert_eq!(body.mass, 4.0);
        assert!(!body.is_static);
        assert_eq!(body.linear_velocity, Vec3::X);
        assert!(matches!(body.shape, BodyShape::Hull(ref p) if p.len() == 8));

        let ground = ObjectDesc::new("ground", cuboid(Vec3::ZERO, Vec3::ONE), 0.0).fixed();
        assert!(ground.body_desc().is_static);
    }

    #[test]
    fn test_lifecycle() {
        let desc = ObjectDesc::new("cube", cuboid(Vec3::ZERO, Vec3::ONE), 4.0)
            .with_velocity(Vec3::new(0.0, -2.0, 0.0), Vec3::ZERO)
            .with_fragments(vec![tetrahedron(), tetrahedron()]);
        let mut object = BreakableObject::new(desc, BodyId(1));
        assert_eq!(object.state(), FractureState::Intact);
        assert_eq!(object.last_velocity().0, Vec3::new(0.0, -2.0, 0.0));
        assert_eq!(object.active_parts().len(), 1);

        object.transition(3, FractureState::Fracturing);
        object.commit_fragments(3, vec![BodyId(5), BodyId(6)]);
        assert!(object.has_fractured());
        assert!(object.state().is_terminal());
        assert_eq!(
            object.history(),
            &[(3, FractureState::Fracturing), (3, FractureState::Fragmented)]
        );
        let parts = object.active_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].0, BodyId(6));
    }

    #[test]
    fn test_static_objects_drop_fragments() {
        let desc = ObjectDesc::new("floor", cuboid(Vec3::ZERO, Vec3::ONE), 0.0)
            .with_fragments(vec![tetrahedron()])
            .fixed();
        let object = BreakableObject::new(desc, BodyId(1));
        assert!(object.is_static());
        assert!(object.fragments().is_empty());
    }
}

//! The fracture decision pass.

use std::sync::Arc;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::{
    BreakableObject, CollisionEncoding, FractureError, FractureFrame, FracturePredictor,
    FractureRequest, FractureState, ImpactEvent, ImpactEventAggregator, ObjectDesc,
};
use crate::mesh::FragmentMesh;
use crate::physics::{BodyDesc, BodyId, BodyShape, PhysicsBackend, PhysicsError};

/// Settings of the fracture decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Aggregate impulse a body must exceed to fracture. Default: 2000.
    pub threshold: f32,
    /// Impacts encoded per prediction. Default: 1.
    pub collision_num: usize,
    /// Impulse mapped to `+1` by the encoding. Default: 10000.
    pub impulse_max: f32,
    /// Predict fragments for objects without precomputed ones. Default: true.
    pub allow_auto_fracture: bool,
    /// Only this object may fracture. Default: any.
    pub target: Option<String>,
    /// Gravity applied when fragments are fired.
    pub gravity: Vec3,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            threshold: 2000.0,
            collision_num: 1,
            impulse_max: 10000.0,
            allow_auto_fracture: true,
            target: None,
            gravity: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

/// One completed fracture.
#[derive(Debug, Clone, PartialEq)]
pub struct FractureOutcome {
    /// Registration index of the object.
    pub object: usize,
    pub name: String,
    pub step: u64,
    pub total_impulse: f32,
    pub frame: FractureFrame,
    pub fragment_bodies: Vec<BodyId>,
}

/// Owns every breakable object and swaps bodies for fragments.
pub struct FractureOrchestrator {
    config: OrchestratorConfig,
    objects: Vec<BreakableObject>,
    predictor: Option<Arc<dyn FracturePredictor>>,
}

impl FractureOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            objects: Vec::new(),
            predictor: None,
        }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn FracturePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn objects(&self) -> &[BreakableObject] {
        &self.objects
    }

    pub fn object(&self, index: usize) -> Option<&BreakableObject> {
        self.objects.get(index)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name() == name)
    }

    /// Create the intact body and start tracking it. Returns its index.
    pub fn register(&mut self, backend: &mut dyn PhysicsBackend, desc: ObjectDesc) -> Result<usize, PhysicsError> {
        let body = backend.create_body(&desc.body_desc())?;
        tracing::debug!(
            name = %desc.name,
            %body,
            is_static = desc.is_static,
            precomputed = desc.fragments.len(),
            "Registered breakable object"
        );
        self.objects.push(BreakableObject::new(desc, body));
        Ok(self.objects.len() - 1)
    }

    /// Move an intact object and reset its remembered velocity.
    pub fn override_object(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        index: usize,
        position: Vec3,
        rotation: Quat,
        linear_velocity: Vec3,
    ) -> Result<(), PhysicsError> {
        let Some(object) = self.objects.get_mut(index) else {
            return Err(PhysicsError::Backend(format!("no object at index {}", index)));
        };
        if object.state() != FractureState::Intact {
            return Ok(());
        }
        backend.set_pose(object.body(), position, rotation)?;
        backend.set_velocity(object.body(), linear_velocity, object.last_velocity().1)?;
        let angular = object.last_velocity().1;
        object.set_last_velocity(linear_velocity, angular);
        Ok(())
    }

    /// Run the decision pass for one step's `contacts`.
    ///
    /// Objects are visited in registration order. Recoverable failures leave
    /// the object intact; only fatal errors are returned.
    pub fn catch_impact(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        contacts: &[ImpactEvent],
        step: u64,
    ) -> Result<Vec<FractureOutcome>, FractureError> {
        let mut outcomes = Vec::new();
        if !contacts.is_empty() {
            let tracked: Vec<BodyId> = self.objects.iter().map(BreakableObject::body).collect();
            let aggregates = ImpactEventAggregator::aggregate(contacts, &tracked);
            tracing::debug!(step, contacts = contacts.len(), "Fracture decision pass");

            for (index, (_, aggregate)) in aggregates.into_iter().enumerate() {
                let object = &self.objects[index];
                if object.is_static() || object.state() != FractureState::Intact {
                    continue;
                }
                if aggregate.total_impulse <= self.config.threshold {
                    continue;
                }
                if let Some(target) = &self.config.target {
                    if target != object.name() {
                        continue;
                    }
                }
                if let Some(outcome) = self.fracture(backend, index, &aggregate.events, aggregate.total_impulse, step)? {
                    outcomes.push(outcome);
                }
            }
        }

        for object in &mut self.objects {
            if object.is_static() || object.state() != FractureState::Intact {
                continue;
            }
            if let Ok(state) = backend.body_state(object.body()) {
                object.set_last_velocity(state.linear_velocity, state.angular_velocity);
            }
        }
        Ok(outcomes)
    }

    fn fracture(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        index: usize,
        events: &[ImpactEvent],
        total_impulse: f32,
        step: u64,
    ) -> Result<Option<FractureOutcome>, FractureError> {
        let object = &mut self.objects[index];
        let state = match backend.body_state(object.body()) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(name = object.name(), "Cannot read body for fracture: {}", e);
                return Ok(None);
            }
        };
        object.transition(step, FractureState::Fracturing);
        let (linear_velocity, angular_velocity) = object.last_velocity();
        let frame = FractureFrame {
            position: state.position,
            rotation: state.rotation,
            linear_velocity,
            angular_velocity,
        };
        tracing::info!(
            name = object.name(),
            body = %object.body(),
            total_impulse,
            step,
            "Fracture triggered"
        );

        if object.fragments().is_empty() && self.config.allow_auto_fracture {
            if let Some(predictor) = &self.predictor {
                let encoding = CollisionEncoding::from_events(
                    events,
                    object.body(),
                    frame.position,
                    frame.rotation,
                    self.config.collision_num,
                    self.config.impulse_max,
                );
                let desc = object.desc();
                let request = FractureRequest {
                    object: &desc.name,
                    encoding: &encoding,
                    surface: &desc.surface,
                    shape: desc.shape.as_ref(),
                    fidelity: desc.fidelity,
                    max_value: desc.max_value,
                    work_dir: desc.work_dir.clone(),
                };
                match predictor.predict(&request) {
                    Ok(fragments) => object.set_fragments(fragments),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(name = object.name(), "Fracture prediction failed: {}", e);
                    }
                    Err(e) => {
                        object.transition(step, FractureState::Intact);
                        return Err(e);
                    }
                }
            }
        }

        if object.fragments().is_empty() {
            tracing::info!(name = object.name(), "No fragments, object stays intact");
            object.transition(step, FractureState::Intact);
            return Ok(None);
        }

        backend.set_gravity(self.config.gravity);
        match spawn_fragments(backend, object.body(), object.fragments(), object.mass(), object.desc(), &frame) {
            Ok(bodies) => {
                tracing::info!(
                    name = object.name(),
                    fragments = bodies.len(),
                    "Fragments instantiated"
                );
                object.commit_fragments(step, bodies.clone());
                Ok(Some(FractureOutcome {
                    object: index,
                    name: object.name().to_string(),
                    step,
                    total_impulse,
                    frame,
                    fragment_bodies: bodies,
                }))
            }
            Err(e) => {
                tracing::warn!(name = object.name(), "Fragment instantiation failed, rolled back: {}", e);
                object.transition(step, FractureState::Intact);
                Ok(None)
            }
        }
    }
}

/// Create one body per fragment, then remove `original`. Any failure
/// removes the bodies created so far.
fn spawn_fragments(
    backend: &mut dyn PhysicsBackend,
    original: BodyId,
    fragments: &[FragmentMesh],
    mass: f32,
    desc: &ObjectDesc,
    frame: &FractureFrame,
) -> Result<Vec<BodyId>, PhysicsError> {
    let fragment_mass = mass / fragments.len() as f32;
    let mut created = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let body = BodyDesc::dynamic(BodyShape::Hull(fragment.vertices.clone()), fragment_mass)
            .with_pose(frame.position, frame.rotation)
            .with_velocity(frame.linear_velocity, Vec3::ZERO)
            .with_material(desc.friction, desc.restitution);
        match backend.create_body(&body) {
            Ok(id) => created.push(id),
            Err(e) => {
                rollback(backend, &created);
                return Err(e);
            }
        }
    }
    if let Err(e) = backend.remove_body(original) {
        rollback(backend, &created);
        return Err(e);
    }
    Ok(created)
}

fn rollback(backend: &mut dyn PhysicsBackend, created: &[BodyId]) {
    for &id in created {
        if let Err(e) = backend.remove_body(id) {
            tracing::warn!(body = %id, "Failed to remove fragment during rollback: {}", e);
        }
    }
}

//! The fixed-timestep simulation loop.
//!
//! Each step of [`RuntimeLoop`]:
//!
//! 1. Polls the [`DebugControlState`]
//! 2. Steps the physics backend
//! 3. Reads the step's contacts and runs the fracture decision pass
//! 4. Optionally exports every object as `{export_dir}/{name}_{step}.obj`

mod debug;
mod export;
mod scene;
mod script;

pub use debug::{DebugControlState, PoseOverride};
pub use export::{export_path, export_step, world_mesh};
pub use scene::{
    load_fragments, parse_initial_states, InitialState, ObjectConfig, SceneConfig, SegmentationChoice,
    WorldSettings,
};
pub use script::{ImpactScript, ScriptedImpact};

use std::path::PathBuf;

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fracture::{FractureError, FractureOrchestrator, FractureOutcome};
use crate::mesh::MeshIoError;
use crate::physics::PhysicsBackend;

/// Rotation from `(roll, pitch, yaw)` radians: roll about X, then pitch
/// about Y, then yaw about Z, all in the fixed frame.
pub fn quat_from_euler(euler: Vec3) -> Quat {
    Quat::from_euler(EulerRot::ZYX, euler.z, euler.y, euler.x)
}

/// Scene, script and state-file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("initial state line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error(transparent)]
    Mesh(#[from] MeshIoError),

    #[error("invalid scene: {0}")]
    Invalid(String),
}

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fixed timestep (seconds). Default: 1/250.
    pub dt: f32,
    /// Steps to run. Default: 60.
    pub steps: u64,
    pub export_dir: PathBuf,
    /// Default: false.
    pub export_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 250.0,
            steps: 60,
            export_dir: PathBuf::from("output"),
            export_enabled: false,
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub contacts: usize,
    pub fractures: Vec<FractureOutcome>,
    pub files_exported: usize,
}

/// Totals of a [`RuntimeLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: u64,
    pub fracture_events: usize,
    pub files_exported: usize,
}

/// Drives a backend and an orchestrator step by step.
pub struct RuntimeLoop<B: PhysicsBackend> {
    backend: B,
    orchestrator: FractureOrchestrator,
    config: RuntimeConfig,
    step: u64,
}

impl<B: PhysicsBackend> RuntimeLoop<B> {
    pub fn new(backend: B, orchestrator: FractureOrchestrator, config: RuntimeConfig) -> Self {
        Self {
            backend,
            orchestrator,
            config,
            step: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn orchestrator(&self) -> &FractureOrchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Index of the next step.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// Run one step.
    pub fn step(&mut self, debug: &mut DebugControlState) -> Result<StepReport, FractureError> {
        let step = self.step;
        let (pose, export) = debug.take();
        if let Some(enabled) = export {
            tracing::info!(enabled, "Export toggled");
            self.config.export_enabled = enabled;
        }
        if let Some(pose) = pose {
            if let Err(e) = self.orchestrator.override_object(
                &mut self.backend,
                pose.object,
                pose.position,
                pose.rotation,
                pose.linear_velocity,
            ) {
                tracing::warn!(object = pose.object, "Pose override ignored: {}", e);
            }
        }

        self.backend.step(self.config.dt);
        let contacts = self.backend.contacts();
        let fractures = self.orchestrator.catch_impact(&mut self.backend, &contacts, step)?;
        tracing::debug!(step, contacts = contacts.len(), fractures = fractures.len(), "Step");

        let files_exported = if self.config.export_enabled {
            export_step(&self.backend, self.orchestrator.objects(), &self.config.export_dir, step)
        } else {
            0
        };

        self.step += 1;
        Ok(StepReport {
            step,
            contacts: contacts.len(),
            fractures,
            files_exported,
        })
    }

    /// Run the configured number of steps.
    pub fn run(&mut self, debug: &mut DebugControlState) -> Result<RunSummary, FractureError> {
        tracing::info!(steps = self.config.steps, dt = self.config.dt, "Simulation started");
        let mut summary = RunSummary::default();
        for _ in 0..self.config.steps {
            let report = self.step(debug)?;
            summary.steps += 1;
            summary.fracture_events += report.fractures.len();
            summary.files_exported += report.files_exported;
        }
        tracing::info!(
            steps = summary.steps,
            fractures = summary.fracture_events,
            exported = summary.files_exported,
            "Simulation finished"
        );
        Ok(summary)
    }
}

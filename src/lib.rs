//! DeepFracture runtime
//!
//! Learned fracture prediction for rigid body simulation: impacts on a
//! breakable object are encoded, decoded into a volumetric break field by a
//! vector-quantized network and turned into watertight fragment meshes that
//! replace the object in the running simulation.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **field** - Dense volumetric fields, NIfTI-1 I/O
//! 2. **mesh** - Triangle meshes, OBJ I/O, surface extraction, smoothing, booleans
//! 3. **segmentation** - Watershed segmentation (in-process or external)
//! 4. **model** - Encoder, codebook and decoder weights (`QuantizedLatentDecoder`)
//! 5. **fracture** - Impact aggregation, field-to-fragments, the orchestrator
//! 6. **physics** - `PhysicsBackend` and the bundled rigid body world (feature = "physics")
//! 7. **ecs** - hecs components of the bundled world (feature = "ecs")
//! 8. **runtime** - Scene files and the fixed-timestep loop

pub mod field;
pub mod fracture;
pub mod mesh;
pub mod model;
pub mod physics;
pub mod runtime;
pub mod segmentation;

#[cfg(feature = "ecs")]
pub mod ecs;

// Re-export commonly used types
pub use field::{LabelVolume, VolumetricField};

pub use fracture::{
    FieldToFragments, FractureError, FractureOrchestrator, FracturePredictor, ImpactEvent,
    ImpactEventAggregator, NeuralFracturePredictor, ObjectDesc, OrchestratorConfig,
};

pub use mesh::FragmentMesh;

pub use model::{Fidelity, ModelRegistry, QuantizedLatentDecoder, ShapeId};

pub use physics::{BodyId, PhysicsBackend, PhysicsConfig};

#[cfg(feature = "physics")]
pub use physics::RigidBodyWorld;

pub use runtime::{DebugControlState, RunSummary, RuntimeConfig, RuntimeLoop, SceneConfig};

// Re-export glam for convenience
pub use glam;

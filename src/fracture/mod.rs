//! Impact-driven fracture: from raw contacts to fragment bodies.
//!
//! # Architecture
//!
//! Each simulation step the [`FractureOrchestrator`]:
//!
//! 1. Aggregates the step's contacts per tracked body ([`ImpactEventAggregator`])
//! 2. Moves objects over the impulse threshold to `Fracturing`
//! 3. Encodes the strongest impacts in the object's frame ([`CollisionEncoding`])
//! 4. Asks a [`FracturePredictor`] for fragments when none are precomputed
//! 5. Swaps the intact body for one body per fragment, or rolls back
//!
//! [`NeuralFracturePredictor`] chains the learned decoder with
//! [`FieldToFragments`].

mod breakable;
mod encoding;
mod fragments;
mod impact;
mod orchestrator;
mod predictor;

pub use breakable::{BreakableObject, FractureFrame, FractureState, ObjectDesc};
pub use encoding::{normalize_impulse, CollisionEncoding, ImpactSlot};
pub use fragments::{grid_to_object, object_to_grid, ComponentSkip, FieldToFragments, SegmentParams};
pub use impact::{AggregateImpact, ImpactEvent, ImpactEventAggregator};
pub use orchestrator::{FractureOrchestrator, FractureOutcome, OrchestratorConfig};
pub use predictor::{FracturePredictor, FractureRequest, NeuralFracturePredictor};

use thiserror::Error;

use crate::mesh::{BooleanOperationFailure, MeshIoError, MeshRepairFailure};
use crate::model::{ModelLoadError, ShapeMismatchError};
use crate::physics::PhysicsError;
use crate::segmentation::SegmentationBackendError;

/// Errors of the fracture path.
#[derive(Error, Debug)]
pub enum FractureError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),

    #[error(transparent)]
    Segmentation(#[from] SegmentationBackendError),

    #[error(transparent)]
    Repair(#[from] MeshRepairFailure),

    #[error(transparent)]
    Boolean(#[from] BooleanOperationFailure),

    #[error(transparent)]
    MeshIo(#[from] MeshIoError),

    #[error(transparent)]
    Physics(#[from] PhysicsError),
}

impl FractureError {
    /// Recoverable errors cost one fracture attempt. The rest abort the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FractureError::ModelLoad(_) | FractureError::ShapeMismatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recoverability() {
        let timeout = FractureError::from(SegmentationBackendError::Timeout {
            timeout: Duration::from_secs(1),
        });
        assert!(timeout.is_recoverable());
        assert!(FractureError::from(BooleanOperationFailure::EmptyResult).is_recoverable());
        assert!(FractureError::from(PhysicsError::Backend("x".into())).is_recoverable());

        let mismatch = FractureError::from(ShapeMismatchError {
            what: "impact position",
            expected: 3,
            actual: 2,
        });
        assert!(!mismatch.is_recoverable());
        assert_eq!(mismatch.to_string(), "impact position: expected 3 values, got 2");
    }
}

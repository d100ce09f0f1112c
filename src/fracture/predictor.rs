//! Fragment prediction behind a trait seam.

use std::path::PathBuf;
use std::sync::Arc;

use super::{CollisionEncoding, FieldToFragments, FractureError, SegmentParams};
use crate::mesh::FragmentMesh;
use crate::model::{Fidelity, ModelLoadError, ModelRegistry, ShapeId, ShapeMismatchError};

/// Inputs of one fracture prediction.
#[derive(Debug, Clone)]
pub struct FractureRequest<'a> {
    pub object: &'a str,
    pub encoding: &'a CollisionEncoding,
    /// Original surface in object space.
    pub surface: &'a FragmentMesh,
    pub shape: Option<&'a ShapeId>,
    pub fidelity: Fidelity,
    pub max_value: f32,
    pub work_dir: Option<PathBuf>,
}

/// Produces object-space fragments for an impact.
pub trait FracturePredictor: Send + Sync {
    fn predict(&self, request: &FractureRequest<'_>) -> Result<Vec<FragmentMesh>, FractureError>;
}

/// Learned model followed by field segmentation.
#[derive(Debug, Clone)]
pub struct NeuralFracturePredictor {
    registry: Arc<ModelRegistry>,
    fragments: FieldToFragments,
    style: Option<Vec<f32>>,
}

impl NeuralFracturePredictor {
    pub fn new(registry: Arc<ModelRegistry>, fragments: FieldToFragments) -> Self {
        Self {
            registry,
            fragments,
            style: None,
        }
    }

    /// Style latent appended to every impact code. Zeros when unset.
    pub fn with_style(mut self, style: Vec<f32>) -> Self {
        self.style = Some(style);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn resolve_shape(&self, shape: Option<&ShapeId>) -> Result<ShapeId, ModelLoadError> {
        if let Some(shape) = shape {
            return Ok(shape.clone());
        }
        let mut shapes = self.registry.shapes();
        match (shapes.next(), shapes.next()) {
            (Some(only), None) => Ok(only.clone()),
            _ => Err(ModelLoadError::Inconsistent(format!(
                "object has no shape and {} models are loaded",
                self.registry.len()
            ))),
        }
    }
}

impl FracturePredictor for NeuralFracturePredictor {
    fn predict(&self, request: &FractureRequest<'_>) -> Result<Vec<FragmentMesh>, FractureError> {
        let shape = self.resolve_shape(request.shape)?;
        let model = self.registry.get(&shape)?;
        ShapeMismatchError::check("impact slots", model.slots(), request.encoding.len())?;

        let (pos, dir, impulse) = request.encoding.to_vectors();
        let decoded = model.decode(&pos, &dir, &impulse, self.style.as_deref(), request.fidelity)?;
        tracing::info!(
            object = request.object,
            shape = %shape,
            code_index = decoded.code_index,
            resolution = decoded.field.resolution(),
            "Decoded fracture field"
        );

        if let Some(dir) = &request.work_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!("Failed to create work directory {}: {}", dir.display(), e);
            }
        }
        let params = SegmentParams::for_fidelity(request.fidelity, request.max_value);
        let fragments = self.fragments.segment(
            &decoded.field,
            request.surface,
            &params,
            request.work_dir.as_deref(),
        )?;
        Ok(fragments)
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::{ModelLoadError, QuantizedLatentDecoder, ShapeId};

/// Loaded models keyed by shape. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<ShapeId, Arc<QuantizedLatentDecoder>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every shape from `model_dir`. The first failure aborts.
    pub fn load<'a>(
        model_dir: impl AsRef<Path>,
        shapes: impl IntoIterator<Item = &'a ShapeId>,
    ) -> Result<Self, ModelLoadError> {
        let mut registry = Self::new();
        for shape in shapes {
            if registry.models.contains_key(shape) {
                continue;
            }
            let model = QuantizedLatentDecoder::load(model_dir.as_ref(), shape)?;
            registry.insert(shape.clone(), model);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, shape: ShapeId, model: QuantizedLatentDecoder) {
        self.models.insert(shape, Arc::new(model));
    }

    pub fn get(&self, shape: &ShapeId) -> Result<Arc<QuantizedLatentDecoder>, ModelLoadError> {
        self.models
            .get(shape)
            .cloned()
            .ok_or_else(|| ModelLoadError::UnknownShape(shape.clone()))
    }

    pub fn shapes(&self) -> impl Iterator<Item = &ShapeId> {
        self.models.keys()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

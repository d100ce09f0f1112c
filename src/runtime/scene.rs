//! JSON scene description and initial-state CSV.
//!
//! Relative paths in a scene are resolved against the scene file's
//! directory.

use std::path::{Path, PathBuf};
#[cfg(feature = "physics")]
use std::sync::Arc;
#[cfg(feature = "physics")]
use std::time::Duration;

#[cfg(feature = "physics")]
use anyhow::Context;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{quat_from_euler, ConfigError, RuntimeConfig};
use crate::fracture::{ObjectDesc, OrchestratorConfig};
use crate::mesh::read_obj;
use crate::model::{Fidelity, ShapeId};
use crate::physics::PhysicsConfig;
use crate::segmentation::WatershedParams;

/// Which watershed implementation segments predicted fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SegmentationChoice {
    #[default]
    Watershed,
    External {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        work_dir: PathBuf,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    300
}

/// Scene-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    pub dt: f32,
    pub steps: u64,
    pub has_gravity: bool,
    pub gravity: Vec3,
    pub collision_num: usize,
    pub impulse_max: f32,
    pub threshold: f32,
    pub allow_auto_fracture: bool,
    pub target: Option<String>,
    pub export_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub segmentation: SegmentationChoice,
    pub watershed: WatershedParams,
    pub physics: PhysicsConfig,
}

impl Default for WorldSettings {
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            dt: runtime.dt,
            steps: runtime.steps,
            has_gravity: true,
            gravity: orchestrator.gravity,
            collision_num: orchestrator.collision_num,
            impulse_max: orchestrator.impulse_max,
            threshold: orchestrator.threshold,
            allow_auto_fracture: orchestrator.allow_auto_fracture,
            target: None,
            export_dir: None,
            model_dir: None,
            segmentation: SegmentationChoice::default(),
            watershed: WatershedParams::default(),
            physics: PhysicsConfig::default(),
        }
    }
}

impl WorldSettings {
    /// Gravity in effect, zero when disabled.
    pub fn effective_gravity(&self) -> Vec3 {
        if self.has_gravity {
            self.gravity
        } else {
            Vec3::ZERO
        }
    }
}

fn default_mass() -> f32 {
    1.0
}

fn default_material() -> f32 {
    -1.0
}

fn default_max_value() -> f32 {
    1.0
}

/// One object of the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub name: String,
    /// OBJ surface in object space.
    pub mesh: PathBuf,
    #[serde(default)]
    pub position: Vec3,
    /// `(roll, pitch, yaw)` in radians.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default)]
    pub linear_velocity: Vec3,
    #[serde(default)]
    pub angular_velocity: Vec3,
    #[serde(default = "default_mass")]
    pub mass: f32,
    /// Negative keeps the backend default.
    #[serde(default = "default_material")]
    pub friction: f32,
    /// Negative keeps the backend default.
    #[serde(default = "default_material")]
    pub restitution: f32,
    #[serde(default)]
    pub is_static: bool,
    /// Directory of precomputed fragment OBJs.
    #[serde(default)]
    pub fracture_dir: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub shape: Option<ShapeId>,
    #[serde(default)]
    pub fidelity: Fidelity,
    #[serde(default = "default_max_value")]
    pub max_value: f32,
}

/// Initial pose and velocities from one CSV line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialState {
    pub position: Vec3,
    /// `(roll, pitch, yaw)`.
    pub rotation: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

/// Parse `;`-separated initial states, one non-empty line per object.
///
/// Fields 2-4 are the position, 5-7 the euler rotation, 8-10 the linear
/// and 11-13 the angular velocity (0-based).
pub fn parse_initial_states(content: &str) -> Result<Vec<InitialState>, ConfigError> {
    let mut states = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < 14 {
            return Err(ConfigError::Csv {
                line: line_no + 1,
                message: format!("expected at least 14 fields, got {}", fields.len()),
            });
        }
        let value = |i: usize| -> Result<f32, ConfigError> {
            fields[i].parse::<f32>().map_err(|e| ConfigError::Csv {
                line: line_no + 1,
                message: format!("field {} (`{}`): {}", i, fields[i], e),
            })
        };
        let vec3 = |start: usize| -> Result<Vec3, ConfigError> {
            Ok(Vec3::new(value(start)?, value(start + 1)?, value(start + 2)?))
        };
        states.push(InitialState {
            position: vec3(2)?,
            rotation: vec3(5)?,
            linear_velocity: vec3(8)?,
            angular_velocity: vec3(11)?,
        });
    }
    Ok(states)
}

/// A scene file plus the directory its relative paths are resolved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub world: WorldSettings,
    pub objects: Vec<ObjectConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SceneConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut scene = Self::from_json(&content).map_err(|e| match e {
            ConfigError::Json { source, .. } => ConfigError::Json {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        scene.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(scene)
    }

    /// Parse a scene whose relative paths resolve against the current
    /// directory.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let scene: Self = serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: PathBuf::new(),
            source,
        })?;
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.world;
        if !(w.dt.is_finite() && w.dt > 0.0) {
            return Err(ConfigError::Invalid(format!("dt must be positive, got {}", w.dt)));
        }
        if w.collision_num == 0 {
            return Err(ConfigError::Invalid("collision_num must be at least 1".into()));
        }
        if !(w.impulse_max.is_finite() && w.impulse_max > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "impulse_max must be positive, got {}",
                w.impulse_max
            )));
        }
        for object in &self.objects {
            if !object.is_static && !(object.mass.is_finite() && object.mass > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "object `{}` needs a positive mass, got {}",
                    object.name, object.mass
                )));
            }
        }
        if let Some(target) = &w.target {
            if !self.objects.iter().any(|o| &o.name == target) {
                return Err(ConfigError::Invalid(format!("target `{}` is not in the scene", target)));
            }
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Override object initial states from a CSV file, line `i` applying to
    /// object `i`.
    pub fn apply_initial_states(&mut self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let states = parse_initial_states(&content)?;
        if states.len() > self.objects.len() {
            tracing::warn!(
                lines = states.len(),
                objects = self.objects.len(),
                "Initial-state file has more lines than objects"
            );
        }
        let applied = states.len().min(self.objects.len());
        for (object, state) in self.objects.iter_mut().zip(states) {
            object.position = state.position;
            object.rotation = state.rotation;
            object.linear_velocity = state.linear_velocity;
            object.angular_velocity = state.angular_velocity;
        }
        Ok(applied)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            dt: self.world.dt,
            steps: self.world.steps,
            export_dir: self
                .world
                .export_dir
                .as_deref()
                .map(|p| self.resolve(p))
                .unwrap_or_else(|| RuntimeConfig::default().export_dir),
            export_enabled: self.world.export_dir.is_some(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            threshold: self.world.threshold,
            collision_num: self.world.collision_num,
            impulse_max: self.world.impulse_max,
            allow_auto_fracture: self.world.allow_auto_fracture,
            target: self.world.target.clone(),
            gravity: self.world.effective_gravity(),
        }
    }

    pub fn physics_config(&self) -> PhysicsConfig {
        PhysicsConfig {
            gravity: self.world.effective_gravity(),
            ..self.world.physics.clone()
        }
    }

    /// Load the meshes of `object` and build its description.
    pub fn object_desc(&self, object: &ObjectConfig) -> Result<ObjectDesc, ConfigError> {
        let surface = read_obj(self.resolve(&object.mesh))?;
        let fragments = match &object.fracture_dir {
            Some(dir) => load_fragments(&self.resolve(dir))?,
            None => Vec::new(),
        };
        let material = |v: f32| if v < 0.0 { None } else { Some(v) };
        Ok(ObjectDesc {
            name: object.name.clone(),
            surface,
            position: object.position,
            rotation: quat_from_euler(object.rotation),
            linear_velocity: object.linear_velocity,
            angular_velocity: object.angular_velocity,
            mass: object.mass,
            friction: material(object.friction),
            restitution: material(object.restitution),
            is_static: object.is_static,
            fragments,
            shape: object.shape.clone(),
            fidelity: object.fidelity,
            max_value: object.max_value,
            work_dir: object.work_dir.as_deref().map(|p| self.resolve(p)),
        })
    }

    /// Shapes the predictor needs a model for.
    pub fn predicted_shapes(&self) -> Vec<ShapeId> {
        let mut shapes: Vec<ShapeId> = self
            .objects
            .iter()
            .filter(|o| !o.is_static && o.fracture_dir.is_none())
            .filter_map(|o| o.shape.clone())
            .collect();
        shapes.sort();
        shapes.dedup();
        shapes
    }
}

/// Every `*.obj` in `dir`, in file-name order.
pub fn load_fragments(dir: &Path) -> Result<Vec<crate::mesh::FragmentMesh>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("obj")))
        .collect();
    paths.sort();
    let mut fragments = Vec::with_capacity(paths.len());
    for path in paths {
        fragments.push(read_obj(&path)?);
    }
    Ok(fragments)
}

#[cfg(feature = "physics")]
impl SceneConfig {
    /// Segmenter and predictor for this scene, if prediction is enabled.
    pub fn predictor(&self) -> anyhow::Result<Option<Arc<dyn crate::fracture::FracturePredictor>>> {
        use crate::fracture::{FieldToFragments, NeuralFracturePredictor};
        use crate::mesh::BspBoolean;
        use crate::model::ModelRegistry;
        use crate::segmentation::{ExternalSegmenter, Segmenter, WatershedSegmenter};

        if !self.world.allow_auto_fracture {
            return Ok(None);
        }
        let Some(model_dir) = &self.world.model_dir else {
            tracing::warn!("Auto fracture is on but no model directory is configured");
            return Ok(None);
        };
        let model_dir = self.resolve(model_dir);
        let shapes = self.predicted_shapes();
        let registry = ModelRegistry::load(&model_dir, &shapes)
            .with_context(|| format!("Failed to load models from {}", model_dir.display()))?;

        let segmenter: Arc<dyn Segmenter> = match &self.world.segmentation {
            SegmentationChoice::Watershed => Arc::new(WatershedSegmenter),
            SegmentationChoice::External {
                program,
                args,
                work_dir,
                timeout_secs,
            } => Arc::new(
                ExternalSegmenter::new(program, self.resolve(work_dir))
                    .with_args(args)
                    .with_timeout(Duration::from_secs(*timeout_secs)),
            ),
        };
        let fragments =
            FieldToFragments::new(segmenter, Arc::new(BspBoolean)).with_watershed(self.world.watershed);
        Ok(Some(Arc::new(NeuralFracturePredictor::new(Arc::new(registry), fragments))))
    }

    /// Build the physics world, register every object and wrap it in a loop.
    pub fn build(&self) -> anyhow::Result<super::RuntimeLoop<crate::physics::RigidBodyWorld>> {
        use crate::fracture::FractureOrchestrator;
        use crate::physics::RigidBodyWorld;

        let mut backend = RigidBodyWorld::new(self.physics_config());
        let mut orchestrator = FractureOrchestrator::new(self.orchestrator_config());
        if let Some(predictor) = self.predictor()? {
            orchestrator = orchestrator.with_predictor(predictor);
        }
        for object in &self.objects {
            let desc = self
                .object_desc(object)
                .with_context(|| format!("Failed to load object `{}`", object.name))?;
            orchestrator
                .register(&mut backend, desc)
                .with_context(|| format!("Failed to create body for `{}`", object.name))?;
        }
        tracing::info!(objects = self.objects.len(), "Scene built");
        Ok(super::RuntimeLoop::new(backend, orchestrator, self.runtime_config()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "world": {"steps": 20, "has_gravity": false, "target": "bunny", "export_dir": "anim"},
        "objects": [
            {"name": "bunny", "mesh": "bunny.obj", "position": [0.0, 1.0, 0.0], "shape": "bunny", "fidelity": "high"},
            {"name": "ball", "mesh": "/abs/sphere.obj", "friction": 0.2, "fracture_dir": "frags"},
            {"name": "floor", "mesh": "floor.obj", "is_static": true, "mass": 0.0}
        ]
    }"#;

    #[test]
    fn test_parse_scene() {
        let scene = SceneConfig::from_json(SCENE).unwrap();
        assert_eq!(scene.world.steps, 20);
        assert_eq!(scene.world.dt, 1.0 / 250.0);
        assert_eq!(scene.world.effective_gravity(), Vec3::ZERO);
        assert_eq!(scene.objects[0].fidelity, Fidelity::High);
        assert_eq!(scene.objects[1].restitution, -1.0);
        assert_eq!(scene.objects[1].mass, 1.0);
        assert_eq!(scene.predicted_shapes(), vec![ShapeId::from("bunny")]);

        let orchestrator = scene.orchestrator_config();
        assert_eq!(orchestrator.target.as_deref(), Some("bunny"));
        assert_eq!(orchestrator.gravity, Vec3::ZERO);
        assert_eq!(scene.physics_config().gravity, Vec3::ZERO);
        let runtime = scene.runtime_config();
        assert!(runtime.export_enabled);
        assert_eq!(runtime.export_dir, PathBuf::from("anim"));
    }

    #[test]
    fn test_validation() {
        let no_target = SCENE.replace("\"target\": \"bunny\"", "\"target\": \"lion\"");
        assert!(matches!(SceneConfig::from_json(&no_target), Err(ConfigError::Invalid(_))));
        let bad_dt = SCENE.replace("\"steps\": 20", "\"dt\": 0.0");
        assert!(matches!(SceneConfig::from_json(&bad_dt), Err(ConfigError::Invalid(_))));
        assert!(matches!(SceneConfig::from_json("{}"), Err(ConfigError::Json { .. })));
    }

    #[test]
    fn test_resolve_relative_to_scene() {
        let mut scene = SceneConfig::from_json(SCENE).unwrap();
        scene.base_dir = PathBuf::from("/data/scenes");
        assert_eq!(scene.resolve(Path::new("bunny.obj")), PathBuf::from("/data/scenes/bunny.obj"));
        assert_eq!(scene.resolve(Path::new("/abs/sphere.obj")), PathBuf::from("/abs/sphere.obj"));
    }

    #[test]
    fn test_parse_initial_states() {
        let csv = "0;bunny;0;1;2;0.1;0.2;0.3;4;5;6;7;8;9\n\n1;ball;1;1;1;0;0;0;0;-3;0;0;0;0\n";
        let states = parse_initial_states(csv).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].position, Vec3::new(0.0, 1.0, 2.0));
        assert_eq!(states[0].rotation, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(states[0].linear_velocity, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(states[0].angular_velocity, Vec3::new(7.0, 8.0, 9.0));
        assert_eq!(states[1].linear_velocity, Vec3::new(0.0, -3.0, 0.0));

        assert!(matches!(parse_initial_states("0;a;1;2"), Err(ConfigError::Csv { line: 1, .. })));
        let bad = "0;a;x;0;0;0;0;0;0;0;0;0;0;0";
        assert!(matches!(parse_initial_states(bad), Err(ConfigError::Csv { .. })));
    }

    #[test]
    fn test_object_desc_loads_meshes() {
        let dir = std::env::temp_dir().join(format!("deepfracture_scene_{}", std::process::id()));
        let frags = dir.join("frags");
        std::fs::create_dir_all(&frags).unwrap();
        let tet = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 3 2\nf 1 2 4\nf 1 4 3\nf 2 3 4\n";
        std::fs::write(dir.join("bunny.obj"), tet).unwrap();
        std::fs::write(frags.join("vol_2.obj"), tet).unwrap();
        std::fs::write(frags.join("vol_1.obj"), tet).unwrap();
        std::fs::write(frags.join("notes.txt"), "skip").unwrap();

        let json = r#"{"objects": [{"name": "bunny", "mesh": "bunny.obj", "fracture_dir": "frags",
            "rotation": [0.0, 0.0, 1.5707964], "restitution": 0.4}]}"#;
        let mut scene = SceneConfig::from_json(json).unwrap();
        scene.base_dir = dir.clone();
        let desc = scene.object_desc(&scene.objects[0]).unwrap();
        assert_eq!(desc.surface.face_count(), 4);
        assert_eq!(desc.fragments.len(), 2);
        assert_eq!(desc.friction, None);
        assert_eq!(desc.restitution, Some(0.4));
        // Yaw of 90° turns +X into +Y.
        assert!((desc.rotation * Vec3::X - Vec3::Y).length() < 1e-5);

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Per-step world-space mesh export.

use std::path::{Path, PathBuf};

use crate::fracture::BreakableObject;
use crate::mesh::{write_obj, FragmentMesh};
use crate::physics::PhysicsBackend;

/// Merge the active parts of `object` in world space.
///
/// `None` when no part has a live body.
pub fn world_mesh(backend: &dyn PhysicsBackend, object: &BreakableObject) -> Option<FragmentMesh> {
    let mut merged: Option<FragmentMesh> = None;
    for (body, mesh) in object.active_parts() {
        let Ok(state) = backend.body_state(body) else {
            continue;
        };
        let part = mesh.transformed(state.rotation, state.position);
        match &mut merged {
            Some(m) => m.append(&part),
            None => merged = Some(part),
        }
    }
    merged
}

/// Path of the export of `name` at `step`.
pub fn export_path(dir: &Path, name: &str, step: u64) -> PathBuf {
    dir.join(format!("{}_{}.obj", name, step))
}

/// Write `{dir}/{name}_{step}.obj` for every object with live parts.
/// Returns the number of files written; failures are logged.
pub fn export_step(backend: &dyn PhysicsBackend, objects: &[BreakableObject], dir: &Path, step: u64) -> usize {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!("Failed to create export directory {}: {}", dir.display(), e);
        return 0;
    }
    let mut written = 0;
    for object in objects {
        let Some(mesh) = world_mesh(backend, object) else {
            tracing::debug!(name = object.name(), step, "No active parts to export");
            continue;
        };
        let path = export_path(dir, object.name(), step);
        match write_obj(&mesh, &path) {
            Ok(()) => written += 1,
            Err(e) => tracing::warn!("Failed to export {}: {}", path.display(), e),
        }
    }
    written
}

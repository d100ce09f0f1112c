//! Triangle meshes for original surfaces and fracture fragments.
//!
//! # Pipeline pieces
//!
//! - [`surface_nets`] extracts a surface from a voxel grid
//! - [`smooth`] relaxes the extracted surface
//! - [`components`] splits a surface into connected pieces
//! - [`boolean`] clips pieces against the original surface
//! - [`repair`] makes a mesh watertight when possible
//! - [`obj`] reads and writes Wavefront OBJ

pub mod boolean;
pub mod components;
pub mod obj;
pub mod repair;
pub mod smooth;
pub mod surface_nets;

use std::collections::HashMap;

use glam::{Quat, Vec3};

pub use boolean::{BooleanOperationFailure, BspBoolean, MeshBoolean};
pub use components::split_components;
pub use obj::{read_obj, write_obj, MeshIoError};
pub use repair::{make_watertight, MeshRepairFailure};
pub use smooth::{laplacian_smooth, SmoothingParams};

/// Signed volumes at or below this are treated as empty.
const MIN_VOLUME: f32 = 1e-12;

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentMesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

impl FragmentMesh {
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Axis-aligned bounds, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
        )
    }

    /// Corner positions of face `i`.
    #[inline]
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let [a, b, c] = self.faces[i];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Signed enclosed volume (divergence theorem). Positive for outward
    /// facing counter-clockwise triangles.
    pub fn signed_volume(&self) -> f32 {
        let mut volume = 0.0f64;
        for i in 0..self.faces.len() {
            let [a, b, c] = self.triangle(i);
            volume += a.as_dvec3().dot(b.as_dvec3().cross(c.as_dvec3()));
        }
        (volume / 6.0) as f32
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f32 {
        (0..self.faces.len())
            .map(|i| {
                let [a, b, c] = self.triangle(i);
                (b - a).cross(c - a).length() * 0.5
            })
            .sum()
    }

    /// Count of directed edges per vertex pair.
    pub(crate) fn directed_edges(&self) -> HashMap<(u32, u32), u32> {
        let mut edges = HashMap::with_capacity(self.faces.len() * 3);
        for face in &self.faces {
            for k in 0..3 {
                *edges.entry((face[k], face[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        edges
    }

    /// `true` if every edge is shared by exactly two oppositely oriented
    /// faces (closed, manifold, consistently wound).
    pub fn is_watertight(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let edges = self.directed_edges();
        edges
            .iter()
            .all(|(&(a, b), &count)| count == 1 && edges.get(&(b, a)) == Some(&1))
    }

    /// Watertight and enclosing a positive volume.
    pub fn is_volume(&self) -> bool {
        self.is_watertight() && self.signed_volume() > MIN_VOLUME
    }

    /// Apply a rotation then a translation to every vertex.
    pub fn transformed(&self, rotation: Quat, translation: Vec3) -> Self {
        Self {
            vertices: self
                .vertices
                .iter()
                .map(|&v| rotation * v + translation)
                .collect(),
            faces: self.faces.clone(),
        }
    }

    /// Append `other`, reindexing its faces.
    pub fn append(&mut self, other: &FragmentMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.faces
            .extend(other.faces.iter().map(|f| [f[0] + base, f[1] + base, f[2] + base]));
    }

    /// Concatenate meshes into one.
    pub fn merge<'a>(meshes: impl IntoIterator<Item = &'a FragmentMesh>) -> Self {
        let mut merged = Self::default();
        for mesh in meshes {
            merged.append(mesh);
        }
        merged
    }

    /// Reverse the winding of every face.
    pub fn flip_faces(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_shapes {
    use super::*;

    /// Closed axis-aligned box with outward winding.
    pub fn cuboid(center: Vec3, half: Vec3) -> FragmentMesh {
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8u32 {
            let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
            let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
            let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
            vertices.push(center + half * Vec3::new(sx, sy, sz));
        }
        let faces = vec![
            [0, 2, 3],
            [0, 3, 1], // -z
            [4, 5, 7],
            [4, 7, 6], // +z
            [0, 1, 5],
            [0, 5, 4], // -y
            [2, 6, 7],
            [2, 7, 3], // +y
            [0, 4, 6],
            [0, 6, 2], // -x
            [1, 3, 7],
            [1, 7, 5], // +x
        ];
        FragmentMesh::new(vertices, faces)
    }

    /// Regular tetrahedron-like closed mesh.
    pub fn tetrahedron() -> FragmentMesh {
        FragmentMesh::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }
}

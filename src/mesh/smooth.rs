//! Taubin (λ|μ) surface smoothing.
//!
//! Alternating shrink and inflate passes of the umbrella Laplacian remove
//! voxel staircase noise without the volume loss of plain Laplacian
//! smoothing. Topology is never changed.

use glam::Vec3;

use super::FragmentMesh;

/// Parameters for [`laplacian_smooth`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    /// Number of λ/μ pass pairs.
    pub iterations: usize,
    /// Shrink factor, in `(0, 1)`.
    pub lambda: f32,
    /// Inflate factor, negative with `|mu| > lambda`.
    pub mu: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            iterations: 15,
            lambda: 0.5,
            mu: -0.53,
        }
    }
}

/// Sorted, deduplicated neighbour lists from the face edges.
fn vertex_neighbours(mesh: &FragmentMesh) -> Vec<Vec<u32>> {
    let mut neighbours = vec![Vec::new(); mesh.vertices.len()];
    for f in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            neighbours[a as usize].push(b);
            neighbours[b as usize].push(a);
        }
    }
    for list in &mut neighbours {
        list.sort_unstable();
        list.dedup();
    }
    neighbours
}

fn laplacian_pass(vertices: &mut Vec<Vec3>, neighbours: &[Vec<u32>], factor: f32) {
    let updated: Vec<Vec3> = vertices
        .iter()
        .zip(neighbours)
        .map(|(&v, adj)| {
            if adj.is_empty() {
                return v;
            }
            let centroid =
                adj.iter().map(|&n| vertices[n as usize]).sum::<Vec3>() / adj.len() as f32;
            v + factor * (centroid - v)
        })
        .collect();
    *vertices = updated;
}

/// Smooth a mesh in place with Taubin's λ|μ scheme.
pub fn laplacian_smooth(mesh: &mut FragmentMesh, params: &SmoothingParams) {
    if mesh.faces.is_empty() || params.iterations == 0 {
        return;
    }
    let neighbours = vertex_neighbours(mesh);
    for _ in 0..params.iterations {
        laplacian_pass(&mut mesh.vertices, &neighbours, params.lambda);
        laplacian_pass(&mut mesh.vertices, &neighbours, params.mu);
    }
}

//! Naive surface nets isosurface extraction on cubic grids.
//!
//! One vertex is placed in every grid cube whose corners change sign, at the
//! centroid of the interpolated edge crossings. A quad joins the four cubes
//! around every sign-changing grid edge. Values below zero are inside and
//! triangles wind counter-clockwise when seen from outside.
//!
//! Grids are x-major (`(x * R + y) * R + z`) and output positions are in
//! voxel units with sample `(0, 0, 0)` at the origin.

use std::collections::BTreeMap;

use glam::Vec3;

use super::FragmentMesh;
use crate::field::{grid_index, LabelVolume, DAM_LABEL};

/// Corner `i` of a cube sits at offset `(i & 1, (i >> 1) & 1, (i >> 2) & 1)`.
const CUBE_EDGES: [[usize; 2]; 12] = [
    [0b000, 0b001],
    [0b010, 0b011],
    [0b100, 0b101],
    [0b110, 0b111],
    [0b000, 0b010],
    [0b001, 0b011],
    [0b100, 0b110],
    [0b101, 0b111],
    [0b000, 0b100],
    [0b001, 0b101],
    [0b010, 0b110],
    [0b011, 0b111],
];

#[inline]
fn corner_offset(corner: usize) -> [usize; 3] {
    [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1]
}

#[inline]
fn corner_vector(corner: usize) -> Vec3 {
    let [x, y, z] = corner_offset(corner);
    Vec3::new(x as f32, y as f32, z as f32)
}

/// Voxels kept around a label's bounding box for ambiguity growth.
const REGION_MARGIN: usize = 2;

/// Extent of a box-shaped x-major grid.
type Dims = [usize; 3];

#[inline]
fn box_index(dims: Dims, x: usize, y: usize, z: usize) -> usize {
    (x * dims[1] + y) * dims[2] + z
}

/// Extract the zero isosurface of a cubic grid of side `resolution`.
pub fn surface_nets(values: &[f32], resolution: usize) -> FragmentMesh {
    let r = resolution;
    if values.len() != r * r * r {
        return FragmentMesh::default();
    }
    extract(values, [r; 3])
}

fn extract(values: &[f32], dims: Dims) -> FragmentMesh {
    let mut mesh = FragmentMesh::default();
    if dims.iter().any(|&d| d < 2) {
        return mesh;
    }

    // Vertex index per cube, keyed by the cube's minimum corner.
    let mut cube_vertex = vec![u32::MAX; values.len()];

    for x in 0..dims[0] - 1 {
        for y in 0..dims[1] - 1 {
            for z in 0..dims[2] - 1 {
                let mut dists = [0.0f32; 8];
                let mut negative = 0;
                for (corner, d) in dists.iter_mut().enumerate() {
                    let [dx, dy, dz] = corner_offset(corner);
                    *d = values[box_index(dims, x + dx, y + dy, z + dz)];
                    if *d < 0.0 {
                        negative += 1;
                    }
                }
                if negative == 0 || negative == 8 {
                    continue;
                }

                let mut sum = Vec3::ZERO;
                let mut count = 0;
                for &[c1, c2] in &CUBE_EDGES {
                    let (d1, d2) = (dists[c1], dists[c2]);
                    if (d1 < 0.0) != (d2 < 0.0) {
                        let t = d1 / (d1 - d2);
                        sum += corner_vector(c1) * (1.0 - t) + corner_vector(c2) * t;
                        count += 1;
                    }
                }

                cube_vertex[box_index(dims, x, y, z)] = mesh.vertices.len() as u32;
                mesh.vertices
                    .push(Vec3::new(x as f32, y as f32, z as f32) + sum / count as f32);
            }
        }
    }

    for axis in 0..3 {
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        for x in 0..dims[0] {
            for y in 0..dims[1] {
                for z in 0..dims[2] {
                    let p = [x, y, z];
                    if p[axis] + 1 >= dims[axis]
                        || p[u] == 0
                        || p[v] == 0
                        || p[u] + 1 >= dims[u]
                        || p[v] + 1 >= dims[v]
                    {
                        continue;
                    }
                    let mut q = p;
                    q[axis] += 1;
                    let inside_p = values[box_index(dims, p[0], p[1], p[2])] < 0.0;
                    let inside_q = values[box_index(dims, q[0], q[1], q[2])] < 0.0;
                    if inside_p == inside_q {
                        continue;
                    }

                    let cube = |du: usize, dv: usize| {
                        let mut c = p;
                        c[u] -= du;
                        c[v] -= dv;
                        cube_vertex[box_index(dims, c[0], c[1], c[2])]
                    };
                    let a = cube(1, 1);
                    let b = cube(0, 1);
                    let d = cube(0, 0);
                    let c = cube(1, 0);

                    // Split along the shorter diagonal.
                    let pos = |i: u32| mesh.vertices[i as usize];
                    let tris = if pos(a).distance_squared(pos(d)) <= pos(b).distance_squared(pos(c))
                    {
                        [[a, b, d], [a, d, c]]
                    } else {
                        [[a, b, c], [b, d, c]]
                    };
                    for mut t in tris {
                        if !inside_p {
                            t.swap(1, 2);
                        }
                        mesh.faces.push(t);
                    }
                }
            }
        }
    }

    mesh
}

/// Returns `true` when the surface through a cube with this inside-corner
/// mask would not be a single disc.
///
/// That happens for a checkerboard on any cube face, or when the inside or
/// outside corners are split into several edge-connected groups.
fn is_ambiguous(mask: u8) -> bool {
    if mask == 0 || mask == 0xFF {
        return false;
    }
    let inside = |c: usize| mask & (1 << c) != 0;

    for axis in 0..3 {
        let (b1, b2) = ((axis + 1) % 3, (axis + 2) % 3);
        for side in 0..2 {
            let corner = |i: usize, j: usize| (side << axis) | (i << b1) | (j << b2);
            let (c00, c11) = (inside(corner(0, 0)), inside(corner(1, 1)));
            let (c01, c10) = (inside(corner(0, 1)), inside(corner(1, 0)));
            if c00 == c11 && c01 == c10 && c00 != c01 {
                return true;
            }
        }
    }

    let groups = |want: bool| {
        let mut seen = 0u8;
        let mut count = 0;
        for start in 0..8 {
            if inside(start) != want || seen & (1 << start) != 0 {
                continue;
            }
            count += 1;
            let mut stack = vec![start];
            seen |= 1 << start;
            while let Some(c) = stack.pop() {
                for bit in [1, 2, 4] {
                    let n = c ^ bit;
                    if inside(n) == want && seen & (1 << n) == 0 {
                        seen |= 1 << n;
                        stack.push(n);
                    }
                }
            }
        }
        count
    };
    groups(true) > 1 || groups(false) > 1
}

/// Grow `inside` until no cube is ambiguous. Returns the number of voxels
/// switched to inside.
fn resolve_ambiguities(inside: &mut [bool], dims: Dims) -> usize {
    let table: Vec<bool> = (0..=255u8).map(is_ambiguous).collect();
    let mut filled = 0;
    loop {
        let mut changed = false;
        for x in 0..dims[0].saturating_sub(1) {
            for y in 0..dims[1].saturating_sub(1) {
                for z in 0..dims[2].saturating_sub(1) {
                    let mut mask = 0u8;
                    for corner in 0..8 {
                        let [dx, dy, dz] = corner_offset(corner);
                        if inside[box_index(dims, x + dx, y + dy, z + dz)] {
                            mask |= 1 << corner;
                        }
                    }
                    if !table[mask as usize] {
                        continue;
                    }
                    for corner in 0..8 {
                        let [dx, dy, dz] = corner_offset(corner);
                        let idx = box_index(dims, x + dx, y + dy, z + dz);
                        if !inside[idx] {
                            inside[idx] = true;
                            filled += 1;
                        }
                    }
                    changed = true;
                }
            }
        }
        if !changed {
            return filled;
        }
    }
}

/// Closed surfaces around every label above `isolevel`.
///
/// Each label is extracted on its own from a padded box around it, so
/// basins that only touch diagonally across a dam stay separate pieces.
/// Ambiguous cubes inside one label are resolved by growing that label's
/// region, which keeps every piece manifold. Labels come out in ascending
/// order and positions are in the grid's voxel units.
pub fn label_surface(labels: &LabelVolume, isolevel: f32) -> FragmentMesh {
    let r = labels.resolution();
    let data = labels.labels();

    let mut regions: BTreeMap<i32, [Dims; 2]> = BTreeMap::new();
    for x in 0..r {
        for y in 0..r {
            for z in 0..r {
                let label = data[grid_index(r, x, y, z)];
                if label as f32 <= isolevel {
                    continue;
                }
                let p = [x, y, z];
                let [lo, hi] = regions.entry(label).or_insert([p, p]);
                for i in 0..3 {
                    lo[i] = lo[i].min(p[i]);
                    hi[i] = hi[i].max(p[i]);
                }
            }
        }
    }

    let pieces: Vec<FragmentMesh> = regions
        .into_iter()
        .map(|(label, [lo, hi])| region_surface(labels, label, lo, hi, isolevel))
        .collect();
    FragmentMesh::merge(&pieces)
}

fn region_surface(labels: &LabelVolume, label: i32, lo: Dims, hi: Dims, isolevel: f32) -> FragmentMesh {
    let r = labels.resolution();
    let data = labels.labels();
    let lo = lo.map(|c| c.saturating_sub(REGION_MARGIN));
    let hi = hi.map(|c| (c + REGION_MARGIN).min(r - 1));
    let dims = [0, 1, 2].map(|i| hi[i] - lo[i] + 1);

    let global = |x: usize, y: usize, z: usize| data[grid_index(r, lo[0] + x, lo[1] + y, lo[2] + z)];
    let mut inside = vec![false; dims.iter().product()];
    for x in 0..dims[0] {
        for y in 0..dims[1] {
            for z in 0..dims[2] {
                inside[box_index(dims, x, y, z)] = global(x, y, z) == label;
            }
        }
    }
    let filled = resolve_ambiguities(&mut inside, dims);
    if filled > 0 {
        tracing::debug!(label, filled, "Grew label region to resolve ambiguous cubes");
    }

    // One outside layer closes the surface at the box boundary.
    let padded = dims.map(|d| d + 2);
    let mut values = vec![isolevel + 1.0; padded.iter().product()];
    for x in 0..dims[0] {
        for y in 0..dims[1] {
            for z in 0..dims[2] {
                let s = if inside[box_index(dims, x, y, z)] {
                    isolevel - 1.0
                } else if global(x, y, z) == DAM_LABEL {
                    isolevel
                } else {
                    isolevel + 1.0
                };
                values[box_index(padded, x + 1, y + 1, z + 1)] = s;
            }
        }
    }

    let mut mesh = extract(&values, padded);
    let offset = Vec3::new(lo[0] as f32, lo[1] as f32, lo[2] as f32) - Vec3::ONE;
    for v in &mut mesh.vertices {
        *v += offset;
    }
    mesh
}

//! Watertight repair for fragment candidates.
//!
//! Cleanup runs in a fixed order: drop non-finite vertices, weld duplicate
//! vertices, drop degenerate and duplicate faces, separate faces crowding
//! one edge, orient faces consistently, close boundary loops, orient each
//! shell outward, then drop unreferenced vertices. The result is accepted
//! only if it encloses a volume.

use std::collections::{BTreeMap, HashMap};

use glam::{DVec3, Vec3};
use thiserror::Error;

use super::FragmentMesh;

/// Vertices closer than this are welded.
const WELD_EPSILON: f32 = 1e-6;
/// Faces with less area than this are degenerate.
const MIN_FACE_AREA: f32 = 1e-12;

/// Why a mesh could not be made watertight.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshRepairFailure {
    #[error("mesh has no usable faces after cleanup")]
    Empty,

    #[error("{count} edges are shared by more than two faces")]
    NonManifold { count: usize },

    #[error("faces cannot be oriented consistently")]
    NonOrientable,

    #[error("{count} boundary loops could not be closed")]
    OpenBoundary { count: usize },

    #[error("repaired mesh encloses no volume (signed volume {volume})")]
    NoVolume { volume: f32 },
}

/// Attempt to turn `mesh` into a closed, outward-facing volume.
pub fn make_watertight(mesh: &FragmentMesh) -> Result<FragmentMesh, MeshRepairFailure> {
    let mut m = remove_non_finite(mesh);
    merge_duplicate_vertices(&mut m, WELD_EPSILON);
    remove_degenerate_faces(&mut m);
    remove_duplicate_faces(&mut m);
    if m.faces.is_empty() {
        return Err(MeshRepairFailure::Empty);
    }

    let non_manifold = count_non_manifold_edges(&m);
    if non_manifold > 0 {
        split_non_manifold_edges(&mut m).ok_or(MeshRepairFailure::NonManifold {
            count: non_manifold,
        })?;
        tracing::debug!(edges = non_manifold, "Separated faces at crowded edges");
    }

    orient_consistently(&mut m)?;
    fill_holes(&mut m)?;
    orient_outward(&mut m);
    remove_unreferenced_vertices(&mut m);

    if !m.is_watertight() {
        return Err(MeshRepairFailure::OpenBoundary { count: 1 });
    }
    let volume = m.signed_volume();
    if !m.is_volume() {
        return Err(MeshRepairFailure::NoVolume { volume });
    }
    Ok(m)
}

fn remove_non_finite(mesh: &FragmentMesh) -> FragmentMesh {
    if mesh.vertices.iter().all(|v| v.is_finite()) {
        return mesh.clone();
    }
    let faces = mesh
        .faces
        .iter()
        .filter(|f| f.iter().all(|&i| mesh.vertices[i as usize].is_finite()))
        .copied()
        .collect();
    let mut out = FragmentMesh::new(mesh.vertices.clone(), faces);
    // Non-finite positions would poison the weld keys.
    for v in &mut out.vertices {
        if !v.is_finite() {
            *v = Vec3::ZERO;
        }
    }
    out
}

/// Weld vertices that quantise to the same `epsilon` cell.
pub(crate) fn merge_duplicate_vertices(mesh: &mut FragmentMesh, epsilon: f32) {
    let mut lookup: HashMap<[i64; 3], u32> = HashMap::with_capacity(mesh.vertices.len());
    let mut remap = Vec::with_capacity(mesh.vertices.len());
    let mut vertices = Vec::with_capacity(mesh.vertices.len());

    for v in &mesh.vertices {
        let key = [
            (v.x / epsilon).round() as i64,
            (v.y / epsilon).round() as i64,
            (v.z / epsilon).round() as i64,
        ];
        let idx = *lookup.entry(key).or_insert_with(|| {
            vertices.push(*v);
            (vertices.len() - 1) as u32
        });
        remap.push(idx);
    }

    for face in &mut mesh.faces {
        for i in face.iter_mut() {
            *i = remap[*i as usize];
        }
    }
    mesh.vertices = vertices;
}

fn remove_degenerate_faces(mesh: &mut FragmentMesh) {
    let vertices = &mesh.vertices;
    mesh.faces.retain(|f| {
        if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
            return false;
        }
        let [a, b, c] = [
            vertices[f[0] as usize],
            vertices[f[1] as usize],
            vertices[f[2] as usize],
        ];
        (b - a).cross(c - a).length() * 0.5 > MIN_FACE_AREA
    });
}

/// Keep one copy of every repeated face. A face present with both windings
/// is a zero-thickness membrane and every copy goes.
fn remove_duplicate_faces(mesh: &mut FragmentMesh) {
    // Winding relative to the sorted vertex order.
    let winding = |f: &[u32; 3]| {
        let k = (0..3).min_by_key(|&k| f[k]).unwrap_or(0);
        f[(k + 1) % 3] < f[(k + 2) % 3]
    };

    let mut windings: HashMap<[u32; 3], (bool, bool)> = HashMap::with_capacity(mesh.faces.len());
    for f in &mesh.faces {
        let mut key = *f;
        key.sort_unstable();
        let seen = windings.entry(key).or_default();
        if winding(f) {
            seen.0 = true;
        } else {
            seen.1 = true;
        }
    }

    let mut kept = std::collections::HashSet::with_capacity(mesh.faces.len());
    mesh.faces.retain(|f| {
        let mut key = *f;
        key.sort_unstable();
        let both = windings.get(&key).is_some_and(|&(fwd, bwd)| fwd && bwd);
        !both && kept.insert(key)
    });
}

fn undirected(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn edge_faces(mesh: &FragmentMesh) -> HashMap<(u32, u32), Vec<usize>> {
    let mut map: HashMap<(u32, u32), Vec<usize>> = HashMap::with_capacity(mesh.faces.len() * 3);
    for (fi, f) in mesh.faces.iter().enumerate() {
        for k in 0..3 {
            map.entry(undirected(f[k], f[(k + 1) % 3]))
                .or_default()
                .push(fi);
        }
    }
    map
}

fn count_non_manifold_edges(mesh: &FragmentMesh) -> usize {
    edge_faces(mesh).values().filter(|f| f.len() > 2).count()
}

#[inline]
fn has_directed(face: &[u32; 3], a: u32, b: u32) -> bool {
    (0..3).any(|k| face[k] == a && face[(k + 1) % 3] == b)
}

/// One face around a crowded edge.
struct EdgeFan {
    angle: f64,
    face: usize,
    forward: bool,
    /// The wedge towards the next face by angle lies behind this face.
    opens_solid: bool,
}

/// Pair the faces around edge `(a, b)` so that each pair bounds one solid
/// wedge. `None` unless the windings alternate around the edge.
fn pair_around_edge(mesh: &FragmentMesh, (a, b): (u32, u32), faces: &[usize]) -> Option<Vec<(usize, usize)>> {
    if faces.len() % 2 != 0 {
        return None;
    }
    let origin = mesh.vertices[a as usize].as_dvec3();
    let axis = (mesh.vertices[b as usize].as_dvec3() - origin).try_normalize()?;
    let u = axis.any_orthonormal_vector();
    let w = axis.cross(u);

    let mut fans: Vec<EdgeFan> = faces
        .iter()
        .map(|&fi| {
            let face = mesh.faces[fi];
            let apex = face.iter().copied().find(|&i| i != a && i != b).unwrap_or(a);
            let d = mesh.vertices[apex as usize].as_dvec3() - origin;
            let [p0, p1, p2] = mesh.triangle(fi).map(|p| p.as_dvec3());
            let normal: DVec3 = (p1 - p0).cross(p2 - p0);
            EdgeFan {
                angle: d.dot(w).atan2(d.dot(u)),
                face: fi,
                forward: has_directed(&face, a, b),
                opens_solid: normal.dot(axis.cross(d)) < 0.0,
            }
        })
        .collect();
    fans.sort_by(|x, y| x.angle.total_cmp(&y.angle).then(x.face.cmp(&y.face)));

    let n = fans.len();
    if (0..n).any(|k| fans[k].forward == fans[(k + 1) % n].forward) {
        return None;
    }
    let start = if fans[0].opens_solid { 0 } else { 1 };
    Some(
        (0..n / 2)
            .map(|k| (fans[(start + 2 * k) % n].face, fans[(start + 2 * k + 1) % n].face))
            .collect(),
    )
}

/// Give every edge at most two faces.
///
/// Faces around a crowded edge are paired by [`pair_around_edge`]; each
/// vertex is then duplicated once per fan of faces that stay connected
/// through paired edges around it.
fn split_non_manifold_edges(mesh: &mut FragmentMesh) -> Option<()> {
    let edges = edge_faces(mesh);
    let mut partner: HashMap<(usize, (u32, u32)), usize> = HashMap::with_capacity(edges.len() * 2);
    for (&edge, faces) in &edges {
        let pairs = match faces.len() {
            0 | 1 => continue,
            2 => vec![(faces[0], faces[1])],
            _ => pair_around_edge(mesh, edge, faces)?,
        };
        for (f, g) in pairs {
            partner.insert((f, edge), g);
            partner.insert((g, edge), f);
        }
    }

    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    for (fi, f) in mesh.faces.iter().enumerate() {
        for &v in f {
            incident[v as usize].push(fi);
        }
    }

    let original = mesh.faces.clone();
    for (v, faces) in incident.iter().enumerate() {
        let v = v as u32;
        let local: HashMap<usize, u32> = faces.iter().enumerate().map(|(i, &f)| (f, i as u32)).collect();
        let mut fans = super::components::UnionFind::new(faces.len());
        for (i, &f) in faces.iter().enumerate() {
            let face = original[f];
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                if a != v && b != v {
                    continue;
                }
                if let Some(j) = partner.get(&(f, undirected(a, b))).and_then(|g| local.get(g)) {
                    fans.union(i as u32, *j);
                }
            }
        }

        let mut copies: HashMap<u32, u32> = HashMap::new();
        for (i, &f) in faces.iter().enumerate() {
            let root = fans.find(i as u32);
            let target = match copies.get(&root) {
                Some(&t) => t,
                None => {
                    let t = if copies.is_empty() {
                        v
                    } else {
                        mesh.vertices.push(mesh.vertices[v as usize]);
                        (mesh.vertices.len() - 1) as u32
                    };
                    copies.insert(root, t);
                    t
                }
            };
            if target != v {
                for k in 0..3 {
                    if original[f][k] == v {
                        mesh.faces[f][k] = target;
                    }
                }
            }
        }
    }
    Some(())
}

/// Flip faces so neighbours traverse every shared edge in opposite
/// directions.
fn orient_consistently(mesh: &mut FragmentMesh) -> Result<(), MeshRepairFailure> {
    let edges = edge_faces(mesh);
    let mut visited = vec![false; mesh.faces.len()];
    let mut queue = std::collections::VecDeque::new();

    for seed in 0..mesh.faces.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        queue.push_back(seed);

        while let Some(fi) = queue.pop_front() {
            let face = mesh.faces[fi];
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                let Some(neighbours) = edges.get(&undirected(a, b)) else {
                    continue;
                };
                for &gi in neighbours {
                    if gi == fi {
                        continue;
                    }
                    let agrees = has_directed(&mesh.faces[gi], a, b);
                    if visited[gi] {
                        if agrees {
                            return Err(MeshRepairFailure::NonOrientable);
                        }
                        continue;
                    }
                    if agrees {
                        mesh.faces[gi].swap(1, 2);
                    }
                    visited[gi] = true;
                    queue.push_back(gi);
                }
            }
        }
    }
    Ok(())
}

/// Close every boundary loop with a fan around its centroid.
fn fill_holes(mesh: &mut FragmentMesh) -> Result<(), MeshRepairFailure> {
    let directed = mesh.directed_edges();

    // A boundary edge (a, b) has no (b, a); the hole runs b -> a.
    let mut next: BTreeMap<u32, u32> = BTreeMap::new();
    let mut branching = 0usize;
    for &(a, b) in directed.keys() {
        if !directed.contains_key(&(b, a)) && next.insert(b, a).is_some() {
            branching += 1;
        }
    }
    if branching > 0 {
        return Err(MeshRepairFailure::OpenBoundary { count: branching });
    }

    let mut unclosed = 0usize;
    while let Some((&start, _)) = next.iter().next() {
        let mut ring = vec![start];
        let mut current = start;
        let mut closed = false;
        while let Some(to) = next.remove(&current) {
            if to == start {
                closed = true;
                break;
            }
            ring.push(to);
            current = to;
        }
        if !closed || ring.len() < 3 {
            unclosed += 1;
            continue;
        }

        if ring.len() == 3 {
            mesh.faces.push([ring[0], ring[1], ring[2]]);
        } else {
            let centroid =
                ring.iter().map(|&i| mesh.vertices[i as usize]).sum::<Vec3>() / ring.len() as f32;
            let c = mesh.vertices.len() as u32;
            mesh.vertices.push(centroid);
            for k in 0..ring.len() {
                mesh.faces.push([ring[k], ring[(k + 1) % ring.len()], c]);
            }
        }
    }

    if unclosed > 0 {
        return Err(MeshRepairFailure::OpenBoundary { count: unclosed });
    }
    Ok(())
}

/// Flip every connected shell whose signed volume is negative.
fn orient_outward(mesh: &mut FragmentMesh) {
    let groups = super::components::face_groups(mesh);
    for faces in groups {
        let mut volume = 0.0f64;
        for &fi in &faces {
            let [a, b, c] = mesh.triangle(fi);
            volume += a.as_dvec3().dot(b.as_dvec3().cross(c.as_dvec3()));
        }
        if volume < 0.0 {
            for &fi in &faces {
                mesh.faces[fi].swap(1, 2);
            }
        }
    }
}

pub(crate) fn remove_unreferenced_vertices(mesh: &mut FragmentMesh) {
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut vertices = Vec::with_capacity(mesh.vertices.len());
    for face in &mut mesh.faces {
        for i in face.iter_mut() {
            let old = *i as usize;
            if remap[old] == u32::MAX {
                remap[old] = vertices.len() as u32;
                vertices.push(mesh.vertices[old]);
            }
            *i = remap[old];
        }
    }
    mesh.vertices = vertices;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_shapes::{cuboid, tetrahedron};

    #[test]
    fn test_valid_mesh_passes_through() {
        let mesh = cuboid(Vec3::ZERO, Vec3::splat(0.5));
        let repaired = make_watertight(&mesh).unwrap();
        assert_eq!(repaired.face_count(), 12);
        assert!(repaired.is_volume());
    }

    #[test]
    fn test_fills_missing_face() {
        let mut mesh = tetrahedron();
        mesh.faces.pop();
        let repaired = make_watertight(&mesh).unwrap();
        assert!(repaired.is_volume());
        assert_eq!(repaired.face_count(), 4);
    }

    #[test]
    fn test_fills_large_hole_with_fan() {
        let mut mesh = cuboid(Vec3::ZERO, Vec3::ONE);
        // Remove both triangles of the +z side: a 4-edge hole.
        mesh.faces.remove(2);
        mesh.faces.remove(2);
        let repaired = make_watertight(&mesh).unwrap();
        assert!(repaired.is_volume());
        assert_eq!(repaired.face_count(), 14, "10 kept faces plus a 4-triangle fan");
        assert!((repaired.signed_volume() - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_fixes_flipped_faces_and_inside_out_shell() {
        let mut mesh = cuboid(Vec3::ZERO, Vec3::ONE);
        mesh.faces[3].swap(1, 2);
        mesh.faces[7].swap(1, 2);
        assert!(!mesh.is_watertight());
        let repaired = make_watertight(&mesh).unwrap();
        assert!(repaired.is_volume());

        let mut inverted = cuboid(Vec3::ZERO, Vec3::ONE);
        inverted.flip_faces();
        let repaired = make_watertight(&inverted).unwrap();
        assert!(repaired.signed_volume() > 0.0);
    }

    #[test]
    fn test_welds_split_vertices_and_drops_duplicates() {
        let base = tetrahedron();
        // Unshare every vertex and duplicate one face.
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for f in &base.faces {
            let start = vertices.len() as u32;
            for &i in f {
                vertices.push(base.vertices[i as usize]);
            }
            faces.push([start, start + 1, start + 2]);
        }
        faces.push(faces[0]);
        let soup = FragmentMesh::new(vertices, faces);

        let repaired = make_watertight(&soup).unwrap();
        assert_eq!(repaired.vertex_count(), 4);
        assert_eq!(repaired.face_count(), 4);
    }

    #[test]
    fn test_non_manifold_edge_fails() {
        let mut mesh = tetrahedron();
        mesh.vertices.push(Vec3::new(-1.0, -1.0, -1.0));
        // A third face on edge (0, 1).
        mesh.faces.push([0, 1, 4]);
        assert!(matches!(
            make_watertight(&mesh),
            Err(MeshRepairFailure::NonManifold { count: 1 })
        ));
    }

    #[test]
    fn test_boxes_sharing_an_edge_are_separated() {
        // Diagonal neighbours: four faces on the edge x = y = 0.
        let a = cuboid(Vec3::new(-0.5, -0.5, 0.0), Vec3::splat(0.5));
        let b = cuboid(Vec3::new(0.5, 0.5, 0.0), Vec3::splat(0.5));
        let touching = FragmentMesh::merge([&a, &b]);
        let repaired = make_watertight(&touching).unwrap();

        assert!(repaired.is_volume());
        assert_eq!(repaired.face_count(), 24);
        assert!((repaired.signed_volume() - 2.0).abs() < 1e-4);
        assert_eq!(crate::mesh::split_components(&repaired).len(), 2);
    }

    #[test]
    fn test_double_wound_membrane_is_removed() {
        let mut mesh = cuboid(Vec3::ZERO, Vec3::ONE);
        // An inner face listed with both windings.
        mesh.faces.push([0, 6, 3]);
        mesh.faces.push([0, 3, 6]);
        let repaired = make_watertight(&mesh).unwrap();
        assert_eq!(repaired.face_count(), 12);
        assert!(repaired.is_volume());
    }

    #[test]
    fn test_empty_mesh_fails() {
        let mesh = FragmentMesh::new(vec![Vec3::ZERO; 3], vec![[0, 1, 2]]);
        assert_eq!(make_watertight(&mesh), Err(MeshRepairFailure::Empty));
    }
}

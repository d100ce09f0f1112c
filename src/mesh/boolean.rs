//! Mesh boolean intersection.
//!
//! [`BspBoolean`] clips closed meshes against each other with binary space
//! partitioning trees (the classic csg.js scheme) evaluated in `f64`. The
//! polygon soup it produces is welded back into an indexed mesh, slivers
//! thinner than the weld tolerance are dropped, T-junctions along shared
//! edges are split, and polygons are ear-clipped into triangles.
//!
//! The trees live in flat arenas and every traversal is iterative, so deep
//! trees built from fine surfaces cannot overflow the stack.

use std::collections::HashMap;

use glam::{DVec3, Vec3};
use thiserror::Error;

use super::FragmentMesh;

/// Plane classification tolerance.
const EPSILON: f64 = 1e-5;

/// Why a boolean operation produced no mesh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BooleanOperationFailure {
    #[error("{operand} operand is not a closed volume")]
    NotAVolume { operand: &'static str },

    #[error("intersection is empty")]
    EmptyResult,

    #[error("boolean backend failed: {0}")]
    Backend(String),
}

/// A mesh boolean capability.
pub trait MeshBoolean: Send + Sync {
    /// The solid shared by `a` and `b`.
    fn intersection(
        &self,
        a: &FragmentMesh,
        b: &FragmentMesh,
    ) -> Result<FragmentMesh, BooleanOperationFailure>;

    /// Repair `mesh` into a closed volume, or `None` if that fails.
    fn make_watertight(&self, mesh: &FragmentMesh) -> Option<FragmentMesh> {
        super::repair::make_watertight(mesh).ok()
    }
}

/// In-process BSP boolean.
#[derive(Debug, Clone, Copy, Default)]
pub struct BspBoolean;

impl MeshBoolean for BspBoolean {
    fn intersection(
        &self,
        a: &FragmentMesh,
        b: &FragmentMesh,
    ) -> Result<FragmentMesh, BooleanOperationFailure> {
        if !a.is_volume() {
            return Err(BooleanOperationFailure::NotAVolume { operand: "first" });
        }
        if !b.is_volume() {
            return Err(BooleanOperationFailure::NotAVolume { operand: "second" });
        }
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) = (a.bounds(), b.bounds()) else {
            return Err(BooleanOperationFailure::EmptyResult);
        };
        if a_hi.cmplt(b_lo).any() || b_hi.cmplt(a_lo).any() {
            return Err(BooleanOperationFailure::EmptyResult);
        }

        let mut ta = BspTree::new(to_polygons(a));
        let mut tb = BspTree::new(to_polygons(b));

        ta.invert();
        tb.clip_to(&ta);
        tb.invert();
        ta.clip_to(&tb);
        tb.clip_to(&ta);
        ta.build(tb.all_polygons());
        ta.invert();

        let polygons = ta.all_polygons();
        if polygons.is_empty() {
            return Err(BooleanOperationFailure::EmptyResult);
        }

        let mesh = polygons_to_mesh(&polygons);
        if mesh.is_empty() || mesh.signed_volume() <= 0.0 {
            return Err(BooleanOperationFailure::EmptyResult);
        }
        Ok(mesh)
    }
}

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: DVec3,
    w: f64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Coplanar = 0,
    Front = 1,
    Back = 2,
    Spanning = 3,
}

impl Plane {
    fn from_points(a: DVec3, b: DVec3, c: DVec3) -> Option<Self> {
        let n = (b - a).cross(c - a);
        let len = n.length();
        if len < 1e-12 {
            return None;
        }
        let normal = n / len;
        Some(Self {
            normal,
            w: normal.dot(a),
        })
    }

    fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }

    fn classify(&self, p: DVec3) -> Side {
        let t = self.normal.dot(p) - self.w;
        if t < -EPSILON {
            Side::Back
        } else if t > EPSILON {
            Side::Front
        } else {
            Side::Coplanar
        }
    }

    /// Sort `polygon` into the four buckets, splitting it if it spans the
    /// plane.
    fn split_polygon(
        &self,
        polygon: Polygon,
        coplanar_front: &mut Vec<Polygon>,
        coplanar_back: &mut Vec<Polygon>,
        front: &mut Vec<Polygon>,
        back: &mut Vec<Polygon>,
    ) {
        let sides: Vec<Side> = polygon.vertices.iter().map(|&v| self.classify(v)).collect();
        let kind = sides.iter().fold(0u8, |acc, &s| acc | s as u8);

        match kind {
            0 => {
                if self.normal.dot(polygon.plane.normal) > 0.0 {
                    coplanar_front.push(polygon);
                } else {
                    coplanar_back.push(polygon);
                }
            }
            1 => front.push(polygon),
            2 => back.push(polygon),
            _ => {
                let n = polygon.vertices.len();
                let mut f = Vec::with_capacity(n + 1);
                let mut b = Vec::with_capacity(n + 1);
                for i in 0..n {
                    let j = (i + 1) % n;
                    let (si, sj) = (sides[i], sides[j]);
                    let (vi, vj) = (polygon.vertices[i], polygon.vertices[j]);
                    if si != Side::Back {
                        f.push(vi);
                    }
                    if si != Side::Front {
                        b.push(vi);
                    }
                    if (si as u8 | sj as u8) == Side::Spanning as u8 {
                        let t = (self.w - self.normal.dot(vi)) / self.normal.dot(vj - vi);
                        let v = vi.lerp(vj, t);
                        f.push(v);
                        b.push(v);
                    }
                }
                if f.len() >= 3 {
                    front.push(Polygon {
                        vertices: f,
                        plane: polygon.plane,
                    });
                }
                if b.len() >= 3 {
                    back.push(Polygon {
                        vertices: b,
                        plane: polygon.plane,
                    });
                }
            }
        }
    }
}

/// A convex planar polygon.
#[derive(Debug, Clone)]
struct Polygon {
    vertices: Vec<DVec3>,
    plane: Plane,
}

impl Polygon {
    fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }
}

fn to_polygons(mesh: &FragmentMesh) -> Vec<Polygon> {
    (0..mesh.faces.len())
        .filter_map(|i| {
            let [a, b, c] = mesh.triangle(i).map(|v| v.as_dvec3());
            Plane::from_points(a, b, c).map(|plane| Polygon {
                vertices: vec![a, b, c],
                plane,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct BspNode {
    plane: Option<Plane>,
    front: Option<usize>,
    back: Option<usize>,
    polygons: Vec<Polygon>,
}

/// Arena-backed BSP tree; node 0 is the root.
#[derive(Debug)]
struct BspTree {
    nodes: Vec<BspNode>,
}

impl BspTree {
    fn new(polygons: Vec<Polygon>) -> Self {
        let mut tree = Self {
            nodes: vec![BspNode::default()],
        };
        tree.build(polygons);
        tree
    }

    fn build(&mut self, polygons: Vec<Polygon>) {
        let mut stack = vec![(0usize, polygons)];
        while let Some((idx, polygons)) = stack.pop() {
            if polygons.is_empty() {
                continue;
            }
            let plane = *self.nodes[idx].plane.get_or_insert(polygons[0].plane);

            let mut coplanar = Vec::new();
            let mut front = Vec::new();
            let mut back = Vec::new();
            for polygon in polygons {
                let mut coplanar_back = Vec::new();
                plane.split_polygon(
                    polygon,
                    &mut coplanar,
                    &mut coplanar_back,
                    &mut front,
                    &mut back,
                );
                coplanar.append(&mut coplanar_back);
            }
            self.nodes[idx].polygons.append(&mut coplanar);

            if !front.is_empty() {
                let child = self.child(idx, true);
                stack.push((child, front));
            }
            if !back.is_empty() {
                let child = self.child(idx, false);
                stack.push((child, back));
            }
        }
    }

    fn child(&mut self, idx: usize, front: bool) -> usize {
        let existing = if front {
            self.nodes[idx].front
        } else {
            self.nodes[idx].back
        };
        if let Some(child) = existing {
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(BspNode::default());
        if front {
            self.nodes[idx].front = Some(child);
        } else {
            self.nodes[idx].back = Some(child);
        }
        child
    }

    /// Turn solid space into empty space and back.
    fn invert(&mut self) {
        for node in &mut self.nodes {
            for polygon in &mut node.polygons {
                polygon.flip();
            }
            if let Some(plane) = &mut node.plane {
                plane.flip();
            }
            std::mem::swap(&mut node.front, &mut node.back);
        }
    }

    /// Remove the parts of `polygons` inside this tree's solid.
    fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let mut kept = Vec::new();
        let mut stack = vec![(0usize, polygons)];
        while let Some((idx, polygons)) = stack.pop() {
            let node = &self.nodes[idx];
            let Some(plane) = node.plane else {
                kept.extend(polygons);
                continue;
            };

            let mut front = Vec::new();
            let mut back = Vec::new();
            for polygon in polygons {
                let mut coplanar_front = Vec::new();
                let mut coplanar_back = Vec::new();
                plane.split_polygon(
                    polygon,
                    &mut coplanar_front,
                    &mut coplanar_back,
                    &mut front,
                    &mut back,
                );
                front.append(&mut coplanar_front);
                back.append(&mut coplanar_back);
            }

            match node.front {
                Some(child) => stack.push((child, front)),
                None => kept.extend(front),
            }
            if let Some(child) = node.back {
                stack.push((child, back));
            }
        }
        kept
    }

    /// Clip every polygon in this tree against `other`.
    fn clip_to(&mut self, other: &BspTree) {
        for node in &mut self.nodes {
            let polygons = std::mem::take(&mut node.polygons);
            node.polygons = other.clip_polygons(polygons);
        }
    }

    fn all_polygons(&self) -> Vec<Polygon> {
        self.nodes
            .iter()
            .flat_map(|n| n.polygons.iter().cloned())
            .collect()
    }
}

/// Spatial hash used to weld nearly coincident vertices.
struct VertexWelder {
    cells: HashMap<[i64; 3], Vec<u32>>,
    vertices: Vec<DVec3>,
}

impl VertexWelder {
    fn new() -> Self {
        Self {
            cells: HashMap::new(),
            vertices: Vec::new(),
        }
    }

    fn cell(p: DVec3) -> [i64; 3] {
        let c = (p / EPSILON).floor();
        [c.x as i64, c.y as i64, c.z as i64]
    }

    fn insert(&mut self, p: DVec3) -> u32 {
        let [cx, cy, cz] = Self::cell(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(bucket) = self.cells.get(&[cx + dx, cy + dy, cz + dz]) {
                        for &i in bucket {
                            if self.vertices[i as usize].distance_squared(p) <= EPSILON * EPSILON {
                                return i;
                            }
                        }
                    }
                }
            }
        }
        let idx = self.vertices.len() as u32;
        self.vertices.push(p);
        self.cells.entry([cx, cy, cz]).or_default().push(idx);
        idx
    }
}

fn polygons_to_mesh(polygons: &[Polygon]) -> FragmentMesh {
    let mut welder = VertexWelder::new();
    let mut rings: Vec<(Vec<u32>, DVec3)> = Vec::with_capacity(polygons.len());
    for polygon in polygons {
        let mut ring: Vec<u32> = Vec::with_capacity(polygon.vertices.len());
        for &v in &polygon.vertices {
            let idx = welder.insert(v);
            if ring.last() != Some(&idx) {
                ring.push(idx);
            }
        }
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() >= 3 && !is_sliver(&welder.vertices, &ring) {
            rings.push((ring, polygon.plane.normal));
        }
    }

    let vertices = welder.vertices;
    fix_t_junctions(&vertices, &mut rings);

    let mut faces = Vec::new();
    for (ring, normal) in &rings {
        triangulate(&vertices, ring, *normal, &mut faces);
    }

    let mut mesh = FragmentMesh::new(
        vertices.iter().map(|v| v.as_vec3()).collect::<Vec<Vec3>>(),
        faces,
    );
    super::repair::remove_unreferenced_vertices(&mut mesh);
    mesh
}

/// A ring whose width is within the weld tolerance encloses no area. Its
/// middle vertices sit on the opposite edge and are picked up by the
/// neighbouring polygon's T-junction split.
fn is_sliver(vertices: &[DVec3], ring: &[u32]) -> bool {
    let n = ring.len();
    let mut twice_area = DVec3::ZERO;
    let mut longest = 0.0f64;
    for k in 0..n {
        let (a, b) = (vertices[ring[k] as usize], vertices[ring[(k + 1) % n] as usize]);
        twice_area += a.cross(b);
        longest = longest.max(a.distance(b));
    }
    twice_area.length() <= EPSILON * longest
}

/// Insert every vertex that lies strictly inside a polygon edge into that
/// edge, so neighbouring polygons share the same vertex chain. Only
/// vertices of other rings are inserted.
fn fix_t_junctions(vertices: &[DVec3], rings: &mut [(Vec<u32>, DVec3)]) {
    if vertices.is_empty() {
        return;
    }

    let mut used = vec![false; vertices.len()];
    for (ring, _) in rings.iter() {
        for &i in ring {
            used[i as usize] = true;
        }
    }
    let live: Vec<u32> = (0..vertices.len() as u32).filter(|&i| used[i as usize]).collect();

    let mut lengths: Vec<f64> = rings
        .iter()
        .flat_map(|(ring, _)| {
            (0..ring.len()).map(move |k| (ring[k], ring[(k + 1) % ring.len()]))
        })
        .map(|(a, b)| vertices[a as usize].distance(vertices[b as usize]))
        .collect();
    if lengths.is_empty() {
        return;
    }
    let mid = lengths.len() / 2;
    lengths.select_nth_unstable_by(mid, f64::total_cmp);
    let cell_size = lengths[mid].max(EPSILON * 10.0);

    let cell_of = |p: DVec3| {
        let c = (p / cell_size).floor();
        [c.x as i64, c.y as i64, c.z as i64]
    };
    let mut grid: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
    for &i in &live {
        grid.entry(cell_of(vertices[i as usize])).or_default().push(i);
    }

    let mut candidates: Vec<u32> = Vec::new();
    let mut on_edge: Vec<(f64, u32)> = Vec::new();
    for (ring, _) in rings.iter_mut() {
        let mut rebuilt = Vec::with_capacity(ring.len());
        for k in 0..ring.len() {
            let (a, b) = (ring[k], ring[(k + 1) % ring.len()]);
            rebuilt.push(a);

            let (pa, pb) = (vertices[a as usize], vertices[b as usize]);
            let ab = pb - pa;
            let len_sq = ab.length_squared();
            if len_sq < EPSILON * EPSILON {
                continue;
            }

            let lo = cell_of(pa.min(pb) - DVec3::splat(EPSILON));
            let hi = cell_of(pa.max(pb) + DVec3::splat(EPSILON));
            let span = (0..3).map(|i| (hi[i] - lo[i] + 1) as usize).product::<usize>();
            candidates.clear();
            if span > live.len() {
                candidates.extend_from_slice(&live);
            } else {
                for x in lo[0]..=hi[0] {
                    for y in lo[1]..=hi[1] {
                        for z in lo[2]..=hi[2] {
                            if let Some(bucket) = grid.get(&[x, y, z]) {
                                candidates.extend_from_slice(bucket);
                            }
                        }
                    }
                }
            }

            on_edge.clear();
            for &c in &candidates {
                if c == a || c == b || ring.contains(&c) {
                    continue;
                }
                let p = vertices[c as usize];
                let t = (p - pa).dot(ab) / len_sq;
                if t <= 0.0 || t >= 1.0 {
                    continue;
                }
                if (pa + ab * t).distance_squared(p) <= EPSILON * EPSILON {
                    on_edge.push((t, c));
                }
            }
            on_edge.sort_by(|x, y| x.0.total_cmp(&y.0));
            on_edge.dedup_by_key(|e| e.1);
            rebuilt.extend(on_edge.iter().map(|&(_, c)| c));
        }
        *ring = rebuilt;
    }
}

/// Strictly convex corner test against the polygon normal.
fn is_convex(vertices: &[DVec3], prev: u32, cur: u32, next: u32, normal: DVec3) -> bool {
    let (p, c, n) = (
        vertices[prev as usize],
        vertices[cur as usize],
        vertices[next as usize],
    );
    (c - p).cross(n - c).dot(normal) > EPSILON * EPSILON
}

fn strict_corners(vertices: &[DVec3], ring: &[u32], normal: DVec3) -> usize {
    let n = ring.len();
    (0..n)
        .filter(|&i| {
            is_convex(
                vertices,
                ring[(i + n - 1) % n],
                ring[i],
                ring[(i + 1) % n],
                normal,
            )
        })
        .count()
}

/// Ear-clip a convex polygon that may carry collinear (T-junction)
/// vertices. An ear is only cut if what remains still has three strict
/// corners, so no zero-area triangle is emitted. Falls back to a fan.
fn triangulate(vertices: &[DVec3], ring: &[u32], normal: DVec3, faces: &mut Vec<[u32; 3]>) {
    let mut ring = ring.to_vec();
    while ring.len() > 3 {
        let n = ring.len();
        let mut cut = None;
        for i in 0..n {
            let (prev, cur, next) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
            if !is_convex(vertices, prev, cur, next, normal) {
                continue;
            }
            let mut rest = ring.clone();
            rest.remove(i);
            if strict_corners(vertices, &rest, normal) >= 3 {
                cut = Some(i);
                break;
            }
        }
        let Some(i) = cut else {
            break;
        };
        faces.push([ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]]);
        ring.remove(i);
    }

    if ring.len() == 3 {
        faces.push([ring[0], ring[1], ring[2]]);
    } else {
        for k in 1..ring.len() - 1 {
            faces.push([ring[0], ring[k], ring[k + 1]]);
        }
    }
}

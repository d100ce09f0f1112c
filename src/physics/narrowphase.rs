//! Narrowphase collision detection: GJK, EPA, and specialized tests.

use glam::{Mat4, Vec3};

use crate::ecs::components::physics::ColliderShape;
use crate::ecs::components::transform::GlobalTransform;

use super::contact::ContactInfo;

const GJK_MAX_ITERATIONS: usize = 64;
const EPA_MAX_ITERATIONS: usize = 64;
const EPA_TOLERANCE: f32 = 1e-4;

/// A point of the Minkowski difference `A - B` with the support points it
/// came from.
#[derive(Debug, Clone, Copy)]
struct SupportPoint {
    point: Vec3,
    on_a: Vec3,
}

struct Pair<'a> {
    shape_a: &'a ColliderShape,
    transform_a: &'a GlobalTransform,
    shape_b: &'a ColliderShape,
    transform_b: &'a GlobalTransform,
}

impl Pair<'_> {
    fn support(&self, direction: Vec3) -> SupportPoint {
        let on_a = self.shape_a.support(direction, self.transform_a);
        let on_b = self.shape_b.support(-direction, self.transform_b);
        SupportPoint {
            point: on_a - on_b,
            on_a,
        }
    }
}

/// Triple cross product: (a x b) x c
fn triple_cross(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    a.cross(b).cross(c)
}

/// GJK intersection test. Returns the final simplex when the shapes overlap.
fn gjk(pair: &Pair) -> Option<Vec<SupportPoint>> {
    let first = pair.support(Vec3::X);
    let mut simplex = vec![first];
    let mut direction = -first.point;

    for _ in 0..GJK_MAX_ITERATIONS {
        if direction.length_squared() < 1e-10 {
            return Some(simplex);
        }
        let next = pair.support(direction);
        if next.point.dot(direction) < 0.0 {
            return None;
        }
        simplex.push(next);
        if evolve_simplex(&mut simplex, &mut direction) {
            return Some(simplex);
        }
    }
    None
}

/// Reduce the simplex towards the origin and pick the next search direction.
/// Returns `true` when the origin is enclosed.
fn evolve_simplex(simplex: &mut Vec<SupportPoint>, direction: &mut Vec3) -> bool {
    match simplex.len() {
        2 => {
            line_case(simplex, direction);
            false
        }
        3 => {
            triangle_case(simplex, direction);
            false
        }
        4 => tetrahedron_case(simplex, direction),
        _ => false,
    }
}

fn line_case(simplex: &mut Vec<SupportPoint>, direction: &mut Vec3) {
    let (a, b) = (simplex[1], simplex[0]);
    let ab = b.point - a.point;
    let ao = -a.point;
    if ab.dot(ao) > 0.0 {
        *direction = triple_cross(ab, ao, ab);
        if direction.length_squared() < 1e-10 {
            // Origin on the segment.
            *direction = ab.any_orthonormal_vector();
        }
    } else {
        *simplex = vec![a];
        *direction = ao;
    }
}

fn triangle_case(simplex: &mut Vec<SupportPoint>, direction: &mut Vec3) {
    let (a, b, c) = (simplex[2], simplex[1], simplex[0]);
    let ab = b.point - a.point;
    let ac = c.point - a.point;
    let ao = -a.point;
    let abc = ab.cross(ac);

    if abc.cross(ac).dot(ao) > 0.0 {
        if ac.dot(ao) > 0.0 {
            *simplex = vec![c, a];
            *direction = triple_cross(ac, ao, ac);
        } else {
            *simplex = vec![b, a];
            line_case(simplex, direction);
        }
    } else if ab.cross(abc).dot(ao) > 0.0 {
        *simplex = vec![b, a];
        line_case(simplex, direction);
    } else if abc.dot(ao) > 0.0 {
        *direction = abc;
    } else {
        *simplex = vec![b, c, a];
        *direction = -abc;
    }
}

fn tetrahedron_case(simplex: &mut Vec<SupportPoint>, direction: &mut Vec3) -> bool {
    let (a, b, c, d) = (simplex[3], simplex[2], simplex[1], simplex[0]);
    let ab = b.point - a.point;
    let ac = c.point - a.point;
    let ad = d.point - a.point;
    let ao = -a.point;

    for (face, normal) in [
        ([c, b, a], ab.cross(ac)),
        ([d, c, a], ac.cross(ad)),
        ([b, d, a], ad.cross(ab)),
    ] {
        if normal.dot(ao) > 0.0 {
            *simplex = face.to_vec();
            *direction = normal;
            triangle_case(simplex, direction);
            return false;
        }
    }
    true
}

/// Grow a degenerate GJK simplex into a tetrahedron around the origin.
fn complete_tetrahedron(pair: &Pair, simplex: &mut Vec<SupportPoint>) -> bool {
    const AXES: [Vec3; 6] = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
    for axis in AXES {
        if simplex.len() == 4 {
            break;
        }
        let candidate = pair.support(axis);
        let independent = match simplex.len() {
            0 => true,
            1 => (candidate.point - simplex[0].point).length_squared() > 1e-10,
            2 => (simplex[1].point - simplex[0].point)
                .cross(candidate.point - simplex[0].point)
                .length_squared()
                > 1e-10,
            _ => {
                let n = (simplex[1].point - simplex[0].point)
                    .cross(simplex[2].point - simplex[0].point);
                n.dot(candidate.point - simplex[0].point).abs() > 1e-8
            }
        };
        if independent {
            simplex.push(candidate);
        }
    }
    simplex.len() == 4
}

/// Barycentric coordinates of `p` in triangle `abc`.
fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let (v0, v1, v2) = (b - a, c - a, p - a);
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-12 {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vec3::new(1.0 - v - w, v, w)
}

/// Outward normal and distance to the origin of a polytope face.
fn face_plane(polytope: &[SupportPoint], face: [usize; 3]) -> Option<(Vec3, f32)> {
    let a = polytope[face[0]].point;
    let n = (polytope[face[1]].point - a).cross(polytope[face[2]].point - a);
    let len = n.length();
    if len < 1e-10 {
        return None;
    }
    let n = n / len;
    let d = n.dot(a);
    Some(if d < 0.0 { (-n, -d) } else { (n, d) })
}

/// EPA (Expanding Polytope Algorithm): penetration depth, normal and a
/// contact point on shape A, moved halfway into the overlap.
fn epa(pair: &Pair, mut polytope: Vec<SupportPoint>) -> Option<ContactInfo> {
    if polytope.len() < 4 && !complete_tetrahedron(pair, &mut polytope) {
        return None;
    }
    let mut faces: Vec<[usize; 3]> = vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];

    for _ in 0..EPA_MAX_ITERATIONS {
        let (closest, normal, dist) = faces
            .iter()
            .enumerate()
            .filter_map(|(i, f)| face_plane(&polytope, *f).map(|(n, d)| (i, n, d)))
            .min_by(|a, b| a.2.total_cmp(&b.2))?;

        let next = pair.support(normal);
        if next.point.dot(normal) - dist < EPA_TOLERANCE {
            let face = faces[closest];
            let [a, b, c] = face.map(|i| polytope[i]);
            let w = barycentric(normal * dist, a.point, b.point, c.point);
            let on_a = a.on_a * w.x + b.on_a * w.y + c.on_a * w.z;
            return Some(ContactInfo {
                normal,
                penetration: dist,
                point: on_a - normal * (dist * 0.5),
            });
        }

        let new_index = polytope.len();
        polytope.push(next);

        // Remove faces that see the new point, keeping their silhouette.
        let mut silhouette: Vec<[usize; 2]> = Vec::new();
        faces.retain(|f| {
            let Some((n, _)) = face_plane(&polytope, *f) else {
                return false;
            };
            if n.dot(next.point - polytope[f[0]].point) <= 0.0 {
                return true;
            }
            for (u, v) in [(f[0], f[1]), (f[1], f[2]), (f[2], f[0])] {
                if let Some(pos) = silhouette.iter().position(|e| *e == [v, u] || *e == [u, v]) {
                    silhouette.swap_remove(pos);
                } else {
                    silhouette.push([u, v]);
                }
            }
            false
        });
        faces.extend(silhouette.iter().map(|e| [e[0], e[1], new_index]));
        if faces.is_empty() {
            return None;
        }
    }
    None
}

/// Sphere-sphere test.
pub fn sphere_sphere(radius_a: f32, center_a: Vec3, radius_b: f32, center_b: Vec3) -> Option<ContactInfo> {
    let diff = center_b - center_a;
    let dist_sq = diff.length_squared();
    let min_dist = radius_a + radius_b;
    if dist_sq >= min_dist * min_dist {
        return None;
    }

    let dist = dist_sq.sqrt();
    let normal = if dist > 1e-6 { diff / dist } else { Vec3::Y };
    let penetration = min_dist - dist;
    Some(ContactInfo {
        normal,
        penetration,
        point: center_a + normal * (radius_a - penetration * 0.5),
    })
}

/// SAT (Separating Axis Theorem) test for box-box collision.
pub fn sat_box_box(half_a: Vec3, transform_a: Mat4, half_b: Vec3, transform_b: Mat4) -> Option<ContactInfo> {
    let center_a = transform_a.transform_point3(Vec3::ZERO);
    let center_b = transform_b.transform_point3(Vec3::ZERO);
    let axes = |m: Mat4| {
        [
            m.x_axis.truncate().normalize_or_zero(),
            m.y_axis.truncate().normalize_or_zero(),
            m.z_axis.truncate().normalize_or_zero(),
        ]
    };
    let (axes_a, axes_b) = (axes(transform_a), axes(transform_b));
    let t = center_b - center_a;

    let project = |axes: &[Vec3; 3], half: Vec3, axis: Vec3| {
        half.x * axes[0].dot(axis).abs() + half.y * axes[1].dot(axis).abs() + half.z * axes[2].dot(axis).abs()
    };

    let mut candidates: Vec<Vec3> = axes_a.iter().chain(&axes_b).copied().collect();
    for a in &axes_a {
        for b in &axes_b {
            let axis = a.cross(*b);
            if axis.length_squared() > 1e-12 {
                candidates.push(axis.normalize());
            }
        }
    }

    let mut min_overlap = f32::MAX;
    let mut best_axis = Vec3::ZERO;
    for axis in candidates {
        let overlap = project(&axes_a, half_a, axis) + project(&axes_b, half_b, axis) - t.dot(axis).abs();
        if overlap <= 0.0 {
            return None;
        }
        if overlap < min_overlap {
            min_overlap = overlap;
            best_axis = axis;
        }
    }

    if best_axis.dot(t) < 0.0 {
        best_axis = -best_axis;
    }
    let reach = project(&axes_a, half_a, best_axis);
    Some(ContactInfo {
        normal: best_axis,
        penetration: min_overlap,
        point: center_a + best_axis * (reach - min_overlap * 0.5),
    })
}

/// Detect collision between two shapes, dispatching to specialized tests where possible.
pub fn detect_collision(
    shape_a: &ColliderShape,
    transform_a: &GlobalTransform,
    shape_b: &ColliderShape,
    transform_b: &GlobalTransform,
) -> Option<ContactInfo> {
    match (shape_a, shape_b) {
        (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) => sphere_sphere(
            *ra,
            transform_a.0.transform_point3(Vec3::ZERO),
            *rb,
            transform_b.0.transform_point3(Vec3::ZERO),
        ),
        (ColliderShape::Box { half_extents: ha }, ColliderShape::Box { half_extents: hb }) => {
            sat_box_box(*ha, transform_a.0, *hb, transform_b.0)
        }
        _ => {
            let pair = Pair {
                shape_a,
                transform_a,
                shape_b,
                transform_b,
            };
            let simplex = gjk(&pair)?;
            epa(&pair, simplex)
        }
    }
}

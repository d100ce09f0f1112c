//! Wavefront OBJ import/export for fragment meshes.
//!
//! Only positions and faces are kept. Polygons are fan-triangulated on load,
//! and `v/vt/vn` style references and negative (relative) indices are
//! accepted.

use std::io::Write;
use std::path::Path;

use glam::Vec3;
use thiserror::Error;

use super::FragmentMesh;

/// Mesh file I/O errors.
#[derive(Error, Debug)]
pub enum MeshIoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    InvalidFormat { line: usize, message: String },
}

/// Export a mesh to an OBJ file.
pub fn write_obj(mesh: &FragmentMesh, path: impl AsRef<Path>) -> Result<(), MeshIoError> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("fragment");
    write_obj_to(mesh, name, &mut w)?;
    w.flush()?;
    Ok(())
}

/// Write OBJ text to any writer.
pub fn write_obj_to(
    mesh: &FragmentMesh,
    name: &str,
    w: &mut impl Write,
) -> Result<(), MeshIoError> {
    writeln!(w, "# deepfracture OBJ export")?;
    writeln!(w, "# Vertices: {}", mesh.vertex_count())?;
    writeln!(w, "# Triangles: {}", mesh.face_count())?;
    writeln!(w, "o {}", name)?;

    for v in &mesh.vertices {
        writeln!(w, "v {} {} {}", v.x, v.y, v.z)?;
    }
    for f in &mesh.faces {
        // OBJ is 1-indexed
        writeln!(w, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1)?;
    }
    Ok(())
}

/// Load an OBJ file.
pub fn read_obj(path: impl AsRef<Path>) -> Result<FragmentMesh, MeshIoError> {
    let content = std::fs::read_to_string(path)?;
    parse_obj(&content)
}

/// Parse OBJ text.
pub fn parse_obj(content: &str) -> Result<FragmentMesh, MeshIoError> {
    let mut mesh = FragmentMesh::default();
    let mut polygon: Vec<u32> = Vec::new();

    for (i, raw) in content.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let mut coords = [0.0f32; 3];
                for c in &mut coords {
                    let token = parts.next().ok_or_else(|| MeshIoError::InvalidFormat {
                        line: line_no,
                        message: "vertex needs three coordinates".into(),
                    })?;
                    *c = token.parse().map_err(|_| MeshIoError::InvalidFormat {
                        line: line_no,
                        message: format!("bad coordinate {:?}", token),
                    })?;
                }
                mesh.vertices.push(Vec3::from_array(coords));
            }
            Some("f") => {
                polygon.clear();
                for token in parts {
                    polygon.push(resolve_index(token, mesh.vertices.len(), line_no)?);
                }
                if polygon.len() < 3 {
                    return Err(MeshIoError::InvalidFormat {
                        line: line_no,
                        message: format!("face has {} vertices", polygon.len()),
                    });
                }
                for k in 1..polygon.len() - 1 {
                    mesh.faces.push([polygon[0], polygon[k], polygon[k + 1]]);
                }
            }
            // Normals, texture coordinates, groups and materials are ignored.
            _ => {}
        }
    }

    Ok(mesh)
}

/// Resolve one `f` token (`7`, `7/2`, `7//3`, `-1`) to a 0-based index.
fn resolve_index(token: &str, vertex_count: usize, line: usize) -> Result<u32, MeshIoError> {
    let position = token.split('/').next().unwrap_or("");
    let raw: i64 = position.parse().map_err(|_| MeshIoError::InvalidFormat {
        line,
        message: format!("bad face index {:?}", token),
    })?;

    let resolved = if raw > 0 {
        raw - 1
    } else {
        vertex_count as i64 + raw
    };
    if raw == 0 || resolved < 0 || resolved >= vertex_count as i64 {
        return Err(MeshIoError::InvalidFormat {
            line,
            message: format!(
                "face index {} out of range ({} vertices)",
                raw, vertex_count
            ),
        });
    }
    Ok(resolved as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_shapes::cuboid;

    #[test]
    fn test_write_then_parse_preserves_topology() {
        let mesh = cuboid(Vec3::new(0.25, -1.5, 3.0), Vec3::new(0.1, 0.7, 1.3));
        let mut buf = Vec::new();
        write_obj_to(&mesh, "box", &mut buf).unwrap();

        let loaded = parse_obj(std::str::from_utf8(&buf).unwrap()).unwrap();
        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.faces, mesh.faces);
        for (a, b) in loaded.vertices.iter().zip(&mesh.vertices) {
            assert!((*a - *b).length() < 1e-6);
        }
    }

    #[test]
    fn test_parse_quads_and_slashes() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n";
        let mesh = parse_obj(text).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_parse_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let mesh = parse_obj(text).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n";
        match parse_obj(text) {
            Err(MeshIoError::InvalidFormat { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_coordinate_is_an_error() {
        assert!(matches!(
            parse_obj("v 0 zero 0\n"),
            Err(MeshIoError::InvalidFormat { line: 1, .. })
        ));
    }
}

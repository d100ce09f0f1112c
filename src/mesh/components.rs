//! Connected-component splitting.

use super::FragmentMesh;

/// Disjoint-set forest over `u32` indices.
pub(crate) struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            rank: vec![0; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    pub(crate) fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => self.parent[ra as usize] = rb,
            std::cmp::Ordering::Greater => self.parent[rb as usize] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
    }
}

/// Face indices of each vertex-connected group, ordered by first face.
pub(crate) fn face_groups(mesh: &FragmentMesh) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(mesh.vertices.len());
    for f in &mesh.faces {
        uf.union(f[0], f[1]);
        uf.union(f[1], f[2]);
    }

    let mut group_of_root: std::collections::HashMap<u32, usize> = Default::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (fi, f) in mesh.faces.iter().enumerate() {
        let root = uf.find(f[0]);
        let g = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(fi);
    }
    groups
}

/// Split a mesh into its vertex-connected pieces.
///
/// Each piece gets its own compact vertex buffer that keeps the input's
/// vertex order. Pieces are ordered by the position of their first face in
/// the input.
pub fn split_components(mesh: &FragmentMesh) -> Vec<FragmentMesh> {
    face_groups(mesh)
        .into_iter()
        .map(|faces| {
            let mut remap = vec![u32::MAX; mesh.vertices.len()];
            for &fi in &faces {
                for &i in &mesh.faces[fi] {
                    remap[i as usize] = 0;
                }
            }

            let mut piece = FragmentMesh::default();
            for (old, slot) in remap.iter_mut().enumerate() {
                if *slot != u32::MAX {
                    *slot = piece.vertices.len() as u32;
                    piece.vertices.push(mesh.vertices[old]);
                }
            }
            piece.faces = faces
                .iter()
                .map(|&fi| mesh.faces[fi].map(|i| remap[i as usize]))
                .collect();
            piece
        })
        .collect()
}

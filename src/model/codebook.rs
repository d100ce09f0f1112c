use super::{ModelLoadError, ShapeMismatchError, Tensor};

/// Rows `[start, end)` of a codebook reserved for one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodebookSlice {
    pub start: usize,
    pub end: usize,
}

impl CodebookSlice {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Result of a nearest-row lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedEntry {
    /// Row index into the full codebook.
    pub index: usize,
    pub row: Vec<f32>,
    /// Mean squared difference between query and row.
    pub distance: f32,
}

/// Table of learned vectors for nearest-neighbour quantization.
#[derive(Debug, Clone)]
pub struct Codebook {
    dim: usize,
    rows: Vec<f32>,
}

impl Codebook {
    pub fn from_tensor(tensor: &Tensor) -> Result<Self, ModelLoadError> {
        let (count, dim) = tensor.matrix_dims("codebook")?;
        if count == 0 || dim == 0 {
            return Err(ModelLoadError::Inconsistent("codebook is empty".into()));
        }
        Ok(Self {
            dim,
            rows: tensor.data.clone(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.rows.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.rows[index * self.dim..(index + 1) * self.dim]
    }

    /// Validate a `[start, end)` range against this codebook.
    pub fn slice(&self, start: usize, end: usize) -> Result<CodebookSlice, ModelLoadError> {
        if start >= end || end > self.len() {
            return Err(ModelLoadError::Inconsistent(format!(
                "codebook slice [{}, {}) out of range for {} rows",
                start,
                end,
                self.len()
            )));
        }
        Ok(CodebookSlice { start, end })
    }

    /// Squared-Euclidean nearest row. Ties go to the lowest index.
    pub fn nearest(
        &self,
        query: &[f32],
        slice: Option<CodebookSlice>,
    ) -> Result<QuantizedEntry, ShapeMismatchError> {
        ShapeMismatchError::check("codebook query", self.dim, query.len())?;
        let range = slice.map_or(0..self.len(), |s| s.start..s.end);

        let mut best = range.start;
        let mut best_dist = f32::INFINITY;
        for i in range {
            let d: f32 = self
                .row(i)
                .iter()
                .zip(query)
                .map(|(r, q)| (r - q) * (r - q))
                .sum();
            if d < best_dist {
                best = i;
                best_dist = d;
            }
        }

        Ok(QuantizedEntry {
            index: best,
            row: self.row(best).to_vec(),
            distance: best_dist / self.dim as f32,
        })
    }
}

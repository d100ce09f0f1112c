//! In-process marker-controlled watershed.
//!
//! 1. h-minima: reconstruction by erosion of `f + tolerance` over `f`
//! 2. markers: regional minima (flat plateaus with no lower neighbour) of the
//!    reconstruction, labelled `1..=K` in scan order
//! 3. flooding: priority flood from the markers with key
//!    `max(parent key, f(n))`, which is flooding of the minima-imposed image;
//!    a voxel reached by two basins becomes a dam (label 0)

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use super::{Connectivity, SegmentationBackendError, Segmenter, WatershedParams};
use crate::field::{grid_coords, grid_index, LabelVolume, VolumetricField, DAM_LABEL};

/// Min-heap entry; ties pop in insertion order.
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    key: f32,
    seq: u64,
    index: u32,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
    seq: u64,
}

impl PriorityQueue {
    fn push(&mut self, key: f32, index: usize) {
        self.heap.push(QueueEntry {
            key,
            seq: self.seq,
            index: index as u32,
        });
        self.seq += 1;
    }

    fn pop(&mut self) -> Option<(f32, usize)> {
        self.heap.pop().map(|e| (e.key, e.index as usize))
    }
}

/// Neighbour lookup for a cubic grid.
struct Grid {
    resolution: usize,
    offsets: &'static [[i32; 3]],
}

impl Grid {
    fn new(resolution: usize, connectivity: Connectivity) -> Self {
        Self {
            resolution,
            offsets: connectivity.offsets(),
        }
    }

    fn neighbours(&self, index: usize, out: &mut Vec<usize>) {
        out.clear();
        let r = self.resolution as i32;
        let [x, y, z] = grid_coords(self.resolution, index);
        for d in self.offsets {
            let (nx, ny, nz) = (x as i32 + d[0], y as i32 + d[1], z as i32 + d[2]);
            if nx < 0 || ny < 0 || nz < 0 || nx >= r || ny >= r || nz >= r {
                continue;
            }
            out.push(grid_index(self.resolution, nx as usize, ny as usize, nz as usize));
        }
    }
}

/// Reconstruction by erosion of `f + h` over `f`: every basin shallower
/// than `h` is filled up to its spill level.
fn h_minima(values: &[f32], h: f32, grid: &Grid) -> Vec<f32> {
    let mut rec: Vec<f32> = values.iter().map(|v| v + h).collect();
    let mut done = vec![false; values.len()];
    let mut queue = PriorityQueue::default();
    for (i, &v) in rec.iter().enumerate() {
        queue.push(v, i);
    }

    let mut nbrs = Vec::with_capacity(26);
    while let Some((key, p)) = queue.pop() {
        if done[p] || key > rec[p] {
            continue;
        }
        done[p] = true;
        grid.neighbours(p, &mut nbrs);
        for &n in &nbrs {
            if done[n] {
                continue;
            }
            let candidate = key.max(values[n]);
            if candidate < rec[n] {
                rec[n] = candidate;
                queue.push(candidate, n);
            }
        }
    }
    rec
}

/// Label regional minima plateaus `1..=K` in scan order; other voxels get 0.
fn label_regional_minima(values: &[f32], grid: &Grid) -> (Vec<i32>, i32) {
    let mut labels = vec![0i32; values.len()];
    let mut visited = vec![false; values.len()];
    let mut next_label = 0;

    let mut plateau = Vec::new();
    let mut queue = VecDeque::new();
    let mut nbrs = Vec::with_capacity(26);

    for start in 0..values.len() {
        if visited[start] {
            continue;
        }
        let level = values[start];
        let mut is_minimum = true;

        plateau.clear();
        visited[start] = true;
        queue.push_back(start);
        while let Some(p) = queue.pop_front() {
            plateau.push(p);
            grid.neighbours(p, &mut nbrs);
            for &n in &nbrs {
                let v = values[n];
                if v < level {
                    is_minimum = false;
                } else if v == level && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if is_minimum {
            next_label += 1;
            for &p in &plateau {
                labels[p] = next_label;
            }
        }
    }
    (labels, next_label)
}

/// Priority flood from labelled markers. Unreached voxels stay 0.
fn flood(values: &[f32], markers: Vec<i32>, grid: &Grid, dams: bool) -> Vec<i32> {
    let mut labels = markers;
    let mut queued: Vec<bool> = labels.iter().map(|&l| l > 0).collect();
    let mut queue = PriorityQueue::default();
    let mut nbrs = Vec::with_capacity(26);

    for p in 0..labels.len() {
        if labels[p] <= 0 {
            continue;
        }
        grid.neighbours(p, &mut nbrs);
        for &n in &nbrs {
            if !queued[n] {
                queued[n] = true;
                queue.push(values[n].max(values[p]), n);
            }
        }
    }

    while let Some((key, p)) = queue.pop() {
        grid.neighbours(p, &mut nbrs);

        let mut label = 0;
        let mut conflict = false;
        for &n in &nbrs {
            let l = labels[n];
            if l <= 0 {
                continue;
            }
            if label == 0 {
                label = l;
            } else if l != label {
                conflict = true;
            }
        }

        if conflict && dams {
            labels[p] = DAM_LABEL;
            continue;
        }
        if label == 0 {
            continue;
        }
        labels[p] = label;

        for &n in &nbrs {
            if !queued[n] {
                queued[n] = true;
                queue.push(key.max(values[n]), n);
            }
        }
    }
    labels
}

/// The in-process watershed backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatershedSegmenter;

impl Segmenter for WatershedSegmenter {
    fn name(&self) -> &str {
        "watershed"
    }

    fn segment(
        &self,
        image: &VolumetricField,
        params: &WatershedParams,
    ) -> Result<LabelVolume, SegmentationBackendError> {
        if image.is_empty() {
            return Err(SegmentationBackendError::InvalidInput(
                "empty image".into(),
            ));
        }
        if params.tolerance.is_nan() || params.tolerance < 0.0 {
            return Err(SegmentationBackendError::InvalidInput(format!(
                "tolerance must be non-negative, got {}",
                params.tolerance
            )));
        }

        let grid = Grid::new(image.resolution(), params.connectivity);
        let reconstructed = h_minima(image.data(), params.tolerance, &grid);
        let (markers, count) = label_regional_minima(&reconstructed, &grid);
        tracing::debug!(markers = count, "Watershed markers extracted");

        let labels = flood(image.data(), markers, &grid, params.dams);
        LabelVolume::from_data(image.resolution(), labels)
            .map_err(|e| SegmentationBackendError::InvalidInput(e.to_string()))
    }
}

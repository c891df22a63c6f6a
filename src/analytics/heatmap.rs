//! Spatial occupancy grid.

use nalgebra::Point2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Hit counts over a fixed grid laid on the camera frame.
///
/// Cells are indexed `[row, col]`, row 0 at the top of the frame. The sum of
/// all cells always equals `total()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGrid {
    cell_width: f32,
    cell_height: f32,
    cells: Array2<u64>,
    total: u64,
}

impl HeatmapGrid {
    /// Grid of `cols` x `rows` cells covering a `frame_width` x `frame_height` frame.
    pub fn new(cols: usize, rows: usize, frame_width: f32, frame_height: f32) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cell_width: frame_width / cols as f32,
            cell_height: frame_height / rows as f32,
            cells: Array2::zeros((rows, cols)),
            total: 0,
        }
    }

    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn cells(&self) -> &Array2<u64> {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u64> {
        self.cells.get((row, col)).copied()
    }

    /// Number of increments since the last reset.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Cell covering `point`, clamped to the grid. `None` for non-finite points.
    pub fn cell_for(&self, point: Point2<f32>) -> Option<(usize, usize)> {
        if !(point.x.is_finite() && point.y.is_finite()) {
            return None;
        }
        let col = clamp_index((point.x / self.cell_width).floor(), self.cols());
        let row = clamp_index((point.y / self.cell_height).floor(), self.rows());
        Some((row, col))
    }

    /// Count one hit at `point`; returns the cell that was incremented.
    pub fn increment(&mut self, point: Point2<f32>) -> Option<(usize, usize)> {
        let (row, col) = self.cell_for(point)?;
        self.cells[[row, col]] += 1;
        self.total += 1;
        Some((row, col))
    }

    /// Busiest cell and its count, `None` while the grid is empty.
    pub fn hottest(&self) -> Option<((usize, usize), u64)> {
        self.cells
            .indexed_iter()
            .filter(|(_, c)| **c > 0)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(idx, &c)| (idx, c))
    }

    /// Cells scaled to [0, 1] by the busiest cell.
    pub fn normalized(&self) -> Array2<f32> {
        let max = self.cells.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return Array2::zeros(self.cells.dim());
        }
        self.cells.mapv(|c| c as f32 / max as f32)
    }

    pub fn reset(&mut self) {
        self.cells.fill(0);
        self.total = 0;
    }
}

fn clamp_index(v: f32, len: usize) -> usize {
    if v <= 0.0 {
        0
    } else {
        (v as usize).min(len - 1)
    }
}

//! Matching utilities for multi-object tracking.

use nalgebra::Point2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;

/// How a predicted track position is compared with a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Pixel distance between centroids
    #[default]
    Euclidean,
    /// 1 - IoU between the predicted box and the detection box
    Iou,
}

/// How the cost matrix is turned into track/detection pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Repeatedly take the globally smallest gated pair
    #[default]
    Greedy,
    /// Minimum total cost assignment (Jonker-Volgenant), then gated
    Optimal,
}

/// Compute centroid distance matrix between tracks and detections.
pub fn euclidean_distance(track_points: &[Point2<f32>], det_points: &[Point2<f32>]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_points.len(), det_points.len()));
    for (i, t) in track_points.iter().enumerate() {
        for (j, d) in det_points.iter().enumerate() {
            dists[[i, j]] = nalgebra::distance(t, d);
        }
    }
    dists
}

/// Compute IoU distance matrix between tracks and detections.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
    for (i, t) in track_boxes.iter().enumerate() {
        for (j, d) in det_boxes.iter().enumerate() {
            dists[[i, j]] = 1.0 - t.iou(d);
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

impl AssignmentResult {
    fn from_matches(matches: Vec<(usize, usize)>, num_rows: usize, num_cols: usize) -> Self {
        let mut row_used = vec![false; num_rows];
        let mut col_used = vec![false; num_cols];
        for &(r, c) in &matches {
            row_used[r] = true;
            col_used[c] = true;
        }
        Self {
            matches,
            unmatched_tracks: (0..num_rows).filter(|&r| !row_used[r]).collect(),
            unmatched_detections: (0..num_cols).filter(|&c| !col_used[c]).collect(),
        }
    }
}

/// Dispatch to the configured strategy.
pub fn assign(cost_matrix: &Array2<f32>, gate: f32, strategy: MatchStrategy) -> AssignmentResult {
    match strategy {
        MatchStrategy::Greedy => greedy_assignment(cost_matrix, gate),
        MatchStrategy::Optimal => linear_assignment(cost_matrix, gate),
    }
}

/// Greedy nearest-neighbour assignment.
///
/// Pairs are taken in ascending cost order; a pair is usable while both its
/// row and column are free and its cost is below `gate`. Equal costs go to
/// the lower row index, then the lower column index, so callers that order
/// rows by track id get "lower id wins".
pub fn greedy_assignment(cost_matrix: &Array2<f32>, gate: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    let mut candidates: Vec<(f32, usize, usize)> = cost_matrix
        .indexed_iter()
        .filter(|&(_, &d)| d < gate)
        .map(|((r, c), &d)| (d, r, c))
        .collect();
    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut row_used = vec![false; num_rows];
    let mut col_used = vec![false; num_cols];
    let mut matches = Vec::new();
    for (_, r, c) in candidates {
        if row_used[r] || col_used[c] {
            continue;
        }
        row_used[r] = true;
        col_used[c] = true;
        matches.push((r, c));
    }

    AssignmentResult::from_matches(matches, num_rows, num_cols)
}

/// Optimal assignment via `lapjv` on a square padded matrix, gated afterwards.
pub fn linear_assignment(cost_matrix: &Array2<f32>, gate: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult::from_matches(vec![], num_rows, num_cols);
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);

    for ((i, j), &d) in cost_matrix.indexed_iter() {
        // non-finite costs would stall the solver
        padded[[i, j]] = if d.is_finite() { d as f64 } else { 1e6 };
    }

    let mut matches = vec![];
    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate() {
                if row_idx >= num_rows || col_idx >= num_cols {
                    continue;
                }
                if cost_matrix[[row_idx, col_idx]] < gate {
                    matches.push((row_idx, col_idx));
                }
            }
        }
        Err(_) => {
            tracing::warn!("lapjv failed, falling back to greedy assignment");
            return greedy_assignment(cost_matrix, gate);
        }
    }

    AssignmentResult::from_matches(matches, num_rows, num_cols)
}

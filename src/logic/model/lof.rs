//! Local Outlier Factor (novelty mode)
//!
//! Density-based scoring: a point whose local density is much lower than
//! that of its k nearest training neighbors is anomalous. Fitting stores
//! the standardized training matrix with per-point k-distances and local
//! reachability densities, so unseen points can be scored afterwards
//! without refitting.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::CancelToken;
use crate::logic::error::{CoreError, CoreResult};

/// Floor for reachability means; duplicated points otherwise divide by zero
const DENSITY_FLOOR: f64 = 1e-10;

/// Cancel checks happen every this many points
const CANCEL_STRIDE: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LofModel {
    /// Effective neighbor count (requested k capped at n - 1)
    k: usize,
    dim: usize,
    /// Standardized training matrix, row-major
    points: Vec<f64>,
    n: usize,
    /// Distance to each training point's k-th neighbor
    k_distance: Vec<f64>,
    /// Local reachability density of each training point
    lrd: Vec<f64>,
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Indices and distances of the k smallest entries, ascending
fn k_nearest(dists: &[(usize, f64)], k: usize) -> Vec<(usize, f64)> {
    let mut sorted = dists.to_vec();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    sorted.truncate(k);
    sorted
}

impl LofModel {
    /// Fit on standardized training data (rows = samples).
    ///
    /// Returns the model plus the LOF value of every training point,
    /// used by the caller for score calibration. O(n^2) distance work,
    /// cancel-checked per stride.
    pub fn fit(
        data: ArrayView2<f64>,
        k: usize,
        cancel: Option<&CancelToken>,
    ) -> CoreResult<(Self, Vec<f64>)> {
        let n = data.nrows();
        let dim = data.ncols();
        if n < 2 {
            return Err(CoreError::InsufficientData {
                required: 2,
                actual: n,
            });
        }
        let k = k.min(n - 1).max(1);

        let rows: Vec<Vec<f64>> = data.rows().into_iter().map(|r| r.to_vec()).collect();

        // Phase 1: k nearest neighbors and k-distance per training point
        let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
        let mut k_distance = vec![0.0; n];
        for i in 0..n {
            check_cancel(cancel, i)?;
            let dists: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(&rows[i], &rows[j])))
                .collect();
            let nearest = k_nearest(&dists, k);
            k_distance[i] = nearest.last().map(|&(_, d)| d).unwrap_or(0.0);
            neighbors.push(nearest);
        }

        // Phase 2: local reachability density per training point
        let mut lrd = vec![0.0; n];
        for i in 0..n {
            check_cancel(cancel, i)?;
            let reach_sum: f64 = neighbors[i]
                .iter()
                .map(|&(j, d)| d.max(k_distance[j]))
                .sum();
            lrd[i] = 1.0 / (reach_sum / k as f64).max(DENSITY_FLOOR);
        }

        // Phase 3: LOF of each training point (density ratio vs neighbors)
        let mut training_lof = vec![0.0; n];
        for i in 0..n {
            let neighbor_lrd: f64 = neighbors[i].iter().map(|&(j, _)| lrd[j]).sum();
            training_lof[i] = neighbor_lrd / (k as f64 * lrd[i]).max(DENSITY_FLOOR);
        }

        log::debug!("lof fitted: {} points, k={}, dim={}", n, k, dim);

        let model = Self {
            k,
            dim,
            points: rows.into_iter().flatten().collect(),
            n,
            k_distance,
            lrd,
        };
        Ok((model, training_lof))
    }

    fn point(&self, i: usize) -> &[f64] {
        &self.points[i * self.dim..(i + 1) * self.dim]
    }

    /// Raw LOF of an unseen standardized point; ~1 for inliers, larger
    /// for points in sparse regions
    pub fn score(&self, row: &[f64]) -> f64 {
        let dists: Vec<(usize, f64)> = (0..self.n)
            .map(|j| (j, euclidean(row, self.point(j))))
            .collect();
        let nearest = k_nearest(&dists, self.k);

        let reach_sum: f64 = nearest
            .iter()
            .map(|&(j, d)| d.max(self.k_distance[j]))
            .sum();
        let lrd_x = 1.0 / (reach_sum / self.k as f64).max(DENSITY_FLOOR);

        let neighbor_lrd: f64 = nearest.iter().map(|&(j, _)| self.lrd[j]).sum();
        neighbor_lrd / (self.k as f64 * lrd_x).max(DENSITY_FLOOR)
    }

    pub fn neighbor_count(&self) -> usize {
        self.k
    }
}

fn check_cancel(cancel: Option<&CancelToken>, i: usize) -> CoreResult<()> {
    if i % CANCEL_STRIDE == 0 {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(CoreError::TrainingCancelled);
            }
        }
    }
    Ok(())
}

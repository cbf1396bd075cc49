//! Isolation Forest
//!
//! Ensemble of randomly built binary trees over a subsample of the
//! training set. Points isolated by few random splits are anomalous:
//! the score is `2^(-E[h(x)] / c(psi))` where `h` is the path length and
//! `c(n)` the average path length of an unsuccessful BST search, so the
//! output lives in (0, 1) with higher = more anomalous.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::CancelToken;
use crate::logic::error::{CoreError, CoreResult};

/// Euler-Mascheroni constant for the harmonic-number approximation
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Cancel checks happen every this many trees
const CANCEL_STRIDE: usize = 8;

// ============================================================================
// PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Per-tree subsample ceiling; effective size is min(this, n)
    pub max_samples: usize,
    pub seed: u64,
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        size: usize,
    },
}

/// Average path length `c(n)` of an unsuccessful search in a BST of n
/// points; the adjustment credited to unsplit leaf populations
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build_tree(
    data: ArrayView2<f64>,
    indices: &[usize],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> TreeNode {
    if indices.len() <= 1 || depth >= max_depth {
        return TreeNode::Leaf {
            size: indices.len(),
        };
    }

    // Only features with spread in this partition can split it
    let n_features = data.ncols();
    let mut candidates = Vec::new();
    for j in 0..n_features {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &i in indices {
            let v = data[(i, j)];
            min = min.min(v);
            max = max.max(v);
        }
        if max > min {
            candidates.push((j, min, max));
        }
    }

    if candidates.is_empty() {
        // All points identical
        return TreeNode::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(min..max);

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| data[(i, feature)] < threshold);

    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(data, &left_idx, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(data, &right_idx, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &TreeNode, row: &[f64], depth: f64) -> f64 {
    match node {
        TreeNode::Leaf { size } => depth + average_path_length(*size),
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] < *threshold {
                path_length(left, row, depth + 1.0)
            } else {
                path_length(right, row, depth + 1.0)
            }
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<TreeNode>,
    /// Effective per-tree subsample size used at fit time
    subsample: usize,
}

impl IsolationForest {
    /// Fit on standardized training data (rows = samples).
    ///
    /// Deterministic for a fixed seed. Checks the cancel token between
    /// tree batches.
    pub fn fit(
        data: ArrayView2<f64>,
        params: &ForestParams,
        cancel: Option<&CancelToken>,
    ) -> CoreResult<Self> {
        let n = data.nrows();
        if n < 2 {
            return Err(CoreError::InsufficientData {
                required: 2,
                actual: n,
            });
        }
        let subsample = params.max_samples.min(n).max(2);
        let max_depth = (subsample as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let mut trees = Vec::with_capacity(params.n_estimators);
        for t in 0..params.n_estimators {
            if t % CANCEL_STRIDE == 0 {
                if let Some(token) = cancel {
                    if token.is_cancelled() {
                        return Err(CoreError::TrainingCancelled);
                    }
                }
            }

            let indices = rand::seq::index::sample(&mut rng, n, subsample).into_vec();
            trees.push(build_tree(data, &indices, 0, max_depth, &mut rng));
        }

        log::debug!(
            "isolation forest fitted: {} trees, subsample {}, depth cap {}",
            trees.len(),
            subsample,
            max_depth
        );

        Ok(Self { trees, subsample })
    }

    /// Raw anomaly score in (0, 1), higher = more anomalous
    pub fn score(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }

        let total: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0.0))
            .sum();
        let mean_path = total / self.trees.len() as f64;
        let c = average_path_length(self.subsample).max(1e-12);

        2f64.powf(-mean_path / c)
    }

    /// Raw scores for every training row, used for calibration
    pub fn training_scores(&self, data: ArrayView2<f64>) -> Vec<f64> {
        data.rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                self.score(&row)
            })
            .collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 50,
            max_samples: 64,
            seed: 42,
        }
    }

    /// Tight cluster near the origin plus one far point
    fn clustered_data(n: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut flat = Vec::with_capacity(n * 2);
        for _ in 0..n {
            flat.push(rng.gen_range(-0.5..0.5));
            flat.push(rng.gen_range(-0.5..0.5));
        }
        Array2::from_shape_vec((n, 2), flat).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(n) grows roughly like 2 ln(n)
        assert!(average_path_length(256) > average_path_length(64));
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let data = clustered_data(200);
        let forest = IsolationForest::fit(data.view(), &params(), None).unwrap();

        let inlier = forest.score(&[0.0, 0.0]);
        let outlier = forest.score(&[10.0, 10.0]);

        assert!(outlier > inlier);
        assert!(outlier > 0.6, "far outlier scored {}", outlier);
        assert!(inlier < 0.6, "central inlier scored {}", inlier);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let data = clustered_data(100);
        let a = IsolationForest::fit(data.view(), &params(), None).unwrap();
        let b = IsolationForest::fit(data.view(), &params(), None).unwrap();

        let row = [0.3, -0.2];
        assert_eq!(a.score(&row), b.score(&row));
    }

    #[test]
    fn test_cancelled_fit_fails() {
        let data = clustered_data(100);
        let token = CancelToken::new();
        token.cancel();

        let result = IsolationForest::fit(data.view(), &params(), Some(&token));
        assert!(matches!(result, Err(CoreError::TrainingCancelled)));
    }

    #[test]
    fn test_identical_points_do_not_loop() {
        let data = Array2::zeros((50, 3));
        let forest = IsolationForest::fit(data.view(), &params(), None).unwrap();
        let score = forest.score(&[0.0, 0.0, 0.0]);
        assert!(score.is_finite());
    }
}

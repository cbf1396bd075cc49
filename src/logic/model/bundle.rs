//! Model Bundle - Versioned fitted-model artifact
//!
//! Everything the engine needs to score unseen records with a previously
//! trained model: the feature scaler, the score calibration derived from
//! the training distribution, and the fitted model state itself. Bundles
//! are keyed by model type + feature layout version; a bundle trained
//! under an older layout refuses to score current vectors.

use chrono::{DateTime, Utc};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::logic::features::layout::validate_layout;
use super::forest::IsolationForest;
use super::lof::LofModel;

// ============================================================================
// MODEL TYPE & SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    IsolationForest,
    LocalOutlierFactor,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::IsolationForest => "isolation_forest",
            ModelType::LocalOutlierFactor => "local_outlier_factor",
        }
    }
}

/// Which model(s) a train/score call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelection {
    IsolationForest,
    LocalOutlierFactor,
    Both,
}

impl ModelSelection {
    /// Parse the wire form used by callers
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolation_forest" => Some(ModelSelection::IsolationForest),
            "local_outlier_factor" | "lof" => Some(ModelSelection::LocalOutlierFactor),
            "both" => Some(ModelSelection::Both),
            _ => None,
        }
    }

    pub fn wants_forest(&self) -> bool {
        matches!(self, ModelSelection::IsolationForest | ModelSelection::Both)
    }

    pub fn wants_lof(&self) -> bool {
        matches!(self, ModelSelection::LocalOutlierFactor | ModelSelection::Both)
    }
}

// ============================================================================
// FEATURE SCALER
// ============================================================================

/// Per-feature standardization parameters fitted at training time.
///
/// Scoring must apply the exact transform the model was trained under,
/// so the parameters travel inside the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

/// Floor for near-constant features
const STD_FLOOR: f64 = 1e-8;

impl ScalerParams {
    /// Fit mean/std per column
    pub fn fit(data: ArrayView2<f64>) -> Self {
        let n = data.nrows().max(1) as f64;
        let cols = data.ncols();

        let mut mean = vec![0.0; cols];
        let mut std = vec![0.0; cols];

        for j in 0..cols {
            let col = data.column(j);
            let m = col.sum() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean[j] = m;
            std[j] = var.sqrt().max(STD_FLOOR);
        }

        Self { mean, std }
    }

    /// Standardize one row (also the per-feature z-scores)
    pub fn transform_row(&self, row: &[f32]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| (v as f64 - self.mean[j]) / self.std[j])
            .collect()
    }

    /// Standardize a full matrix in place
    pub fn transform(&self, data: &mut ndarray::Array2<f64>) {
        for (j, mut col) in data.columns_mut().into_iter().enumerate() {
            col.mapv_inplace(|v| (v - self.mean[j]) / self.std[j]);
        }
    }
}

// ============================================================================
// SCORE CALIBRATION
// ============================================================================

/// Maps a model's native score onto [0, 1] against the training
/// distribution, and records where the contamination quantile falls in
/// that normalized space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreCalibration {
    pub raw_min: f64,
    pub raw_max: f64,
    /// Contamination-calibrated decision point, normalized space
    pub threshold: f64,
}

impl ScoreCalibration {
    /// Derive calibration from the raw scores of the training set
    pub fn from_training_scores(raw_scores: &[f64], contamination: f64) -> Self {
        let mut sorted: Vec<f64> = raw_scores.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let raw_min = sorted.first().copied().unwrap_or(0.0);
        let raw_max = sorted.last().copied().unwrap_or(1.0);

        // Raw score at the (1 - contamination) quantile: points above it
        // are the assumed anomalous fraction.
        let raw_cut = quantile(&sorted, 1.0 - contamination);
        let span = (raw_max - raw_min).max(1e-12);
        let threshold = ((raw_cut - raw_min) / span).clamp(0.0, 1.0);

        Self {
            raw_min,
            raw_max,
            threshold,
        }
    }

    /// Normalize a raw score into [0, 1]
    pub fn normalize(&self, raw: f64) -> f64 {
        let span = (self.raw_max - self.raw_min).max(1e-12);
        ((raw - self.raw_min) / span).clamp(0.0, 1.0)
    }
}

/// Quantile over a sorted slice (nearest-rank with interpolation)
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

// ============================================================================
// MODEL BUNDLE
// ============================================================================

/// Fitted model state, tagged by type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    Forest(IsolationForest),
    Lof(LofModel),
}

/// Persisted fitted-model artifact plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model_type: ModelType,
    pub feature_version: u8,
    pub layout_hash: u32,
    /// Contamination the training run assumed
    pub contamination: f64,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub scaler: ScalerParams,
    pub calibration: ScoreCalibration,
    pub model: FittedModel,
}

impl ModelBundle {
    /// Check the bundle was trained under the current feature layout
    pub fn is_layout_compatible(&self) -> bool {
        validate_layout(self.feature_version, self.layout_hash).is_ok()
    }

    /// Score one record's raw feature values, normalized to [0, 1]
    /// (1 = most anomalous). The row must be layout-compatible.
    pub fn score(&self, raw_features: &[f32]) -> f64 {
        let scaled = self.scaler.transform_row(raw_features);
        let raw = match &self.model {
            FittedModel::Forest(forest) => forest.score(&scaled),
            FittedModel::Lof(lof) => lof.score(&scaled),
        };
        self.calibration.normalize(raw)
    }
}

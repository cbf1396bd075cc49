//! Core configuration.
//!
//! All tunables for the detection core in one validated struct. Defaults
//! come from `constants.rs`; callers may override per instance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants;
use crate::logic::error::{CoreError, CoreResult};

/// How scores from the two models are fused into one decision
/// when both are selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FusionPolicy {
    /// Flag when either model exceeds the threshold (favors recall)
    Or,
    /// Flag only when every selected model exceeds the threshold
    And,
    /// Flag when the weighted mean of available scores exceeds the threshold
    Weighted { forest_weight: f64, lof_weight: f64 },
}

impl Default for FusionPolicy {
    fn default() -> Self {
        FusionPolicy::Or
    }
}

/// Detection core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Decision threshold on normalized scores, range (0, 1)
    pub threshold: f64,

    /// Assumed anomaly fraction in training data, range (0, 0.5)
    pub contamination: f64,

    /// Score fusion policy for `both` model selection
    pub fusion: FusionPolicy,

    /// Number of isolation trees
    pub n_estimators: usize,

    /// Per-tree subsample ceiling
    pub max_samples: usize,

    /// LOF neighbor count
    pub n_neighbors: usize,

    /// Minimum viable training-set size (raised to `n_neighbors + 1`
    /// when LOF is selected)
    pub min_training_samples: usize,

    /// RNG seed for reproducible forest fitting
    pub seed: u64,

    /// Idle timeout (seconds) before a capture flow is considered
    /// complete. Operational tuning parameter; 120 s by default.
    pub flow_timeout_secs: u64,

    /// Directory for persisted model bundles
    pub model_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            threshold: constants::DEFAULT_THRESHOLD,
            contamination: constants::DEFAULT_CONTAMINATION,
            fusion: FusionPolicy::default(),
            n_estimators: constants::DEFAULT_N_ESTIMATORS,
            max_samples: constants::DEFAULT_MAX_SAMPLES,
            n_neighbors: constants::DEFAULT_N_NEIGHBORS,
            min_training_samples: constants::DEFAULT_MIN_TRAINING_SAMPLES,
            seed: constants::DEFAULT_SEED,
            flow_timeout_secs: constants::DEFAULT_FLOW_TIMEOUT_SECS,
            model_dir: constants::get_model_dir(),
        }
    }
}

impl CoreConfig {
    /// Build a config from environment overrides on top of the defaults
    pub fn from_env() -> Self {
        Self {
            threshold: constants::get_threshold(),
            contamination: constants::get_contamination(),
            flow_timeout_secs: constants::get_flow_timeout_secs(),
            model_dir: constants::get_model_dir(),
            ..Default::default()
        }
    }

    /// High sensitivity (lower threshold)
    pub fn high_sensitivity() -> Self {
        Self {
            threshold: 0.5,
            ..Default::default()
        }
    }

    /// Low sensitivity (higher threshold)
    pub fn low_sensitivity() -> Self {
        Self {
            threshold: 0.85,
            ..Default::default()
        }
    }

    /// Validate all parameter ranges
    pub fn validate(&self) -> CoreResult<()> {
        validate_threshold(self.threshold)?;
        validate_contamination(self.contamination)?;

        if self.n_estimators == 0 {
            return Err(CoreError::InvalidParameter {
                name: "n_estimators",
                detail: "must be at least 1".to_string(),
            });
        }
        if self.max_samples < 2 {
            return Err(CoreError::InvalidParameter {
                name: "max_samples",
                detail: "must be at least 2".to_string(),
            });
        }
        if self.n_neighbors == 0 {
            return Err(CoreError::InvalidParameter {
                name: "n_neighbors",
                detail: "must be at least 1".to_string(),
            });
        }
        if let FusionPolicy::Weighted {
            forest_weight,
            lof_weight,
        } = self.fusion
        {
            if forest_weight < 0.0 || lof_weight < 0.0 || forest_weight + lof_weight <= 0.0 {
                return Err(CoreError::InvalidParameter {
                    name: "fusion",
                    detail: "weights must be non-negative and sum above zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Effective minimum training-set size for a given model selection
    pub fn effective_min_samples(&self, wants_lof: bool) -> usize {
        if wants_lof {
            self.min_training_samples.max(self.n_neighbors + 1)
        } else {
            self.min_training_samples
        }
    }
}

/// Validate a decision threshold, range (0, 1)
pub fn validate_threshold(threshold: f64) -> CoreResult<()> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold >= 1.0 {
        return Err(CoreError::InvalidParameter {
            name: "threshold",
            detail: format!("must be in (0, 1), got {}", threshold),
        });
    }
    Ok(())
}

/// Validate a contamination fraction, range (0, 0.5)
pub fn validate_contamination(contamination: f64) -> CoreResult<()> {
    if !contamination.is_finite() || contamination <= 0.0 || contamination >= 0.5 {
        return Err(CoreError::InvalidParameter {
            name: "contamination",
            detail: format!("must be in (0, 0.5), got {}", contamination),
        });
    }
    Ok(())
}

//! Model Module - Unsupervised Anomaly Scorers
//!
//! - `forest`  - Isolation Forest (random partitioning, path-length scores)
//! - `lof`     - Local Outlier Factor in novelty mode
//! - `bundle`  - Fitted-model artifact: scaler, calibration, model state
//! - `store`   - Persisted bundle store (atomic writes, checksummed)
//! - `engine`  - Detection engine: train/score/decide, fusion, swap-on-retrain

pub mod bundle;
pub mod engine;
pub mod forest;
pub mod lof;
pub mod store;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation handle for long-running training.
///
/// Checked between major fitting phases; a cancelled run fails with
/// `TrainingCancelled` and never touches the previously ready bundle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

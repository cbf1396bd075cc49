//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change a default, only edit this file.

/// Default anomaly decision threshold on normalized scores
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Default assumed fraction of anomalies in training data
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

/// Default number of isolation trees
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Default per-tree subsample ceiling
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Default LOF neighbor count
pub const DEFAULT_N_NEIGHBORS: usize = 20;

/// Default minimum viable training-set size
pub const DEFAULT_MIN_TRAINING_SAMPLES: usize = 32;

/// Default RNG seed for reproducible forest fitting
pub const DEFAULT_SEED: u64 = 42;

/// Default idle timeout (seconds) before a capture flow is cut
pub const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 120;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "IoT-Sentinel";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get decision threshold from environment or use default
pub fn get_threshold() -> f64 {
    std::env::var("SENTINEL_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_THRESHOLD)
}

/// Get contamination from environment or use default
pub fn get_contamination() -> f64 {
    std::env::var("SENTINEL_CONTAMINATION")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_CONTAMINATION)
}

/// Get flow timeout from environment or use default
pub fn get_flow_timeout_secs() -> u64 {
    std::env::var("SENTINEL_FLOW_TIMEOUT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FLOW_TIMEOUT_SECS)
}

/// Get model directory from environment, falling back to the local data dir
pub fn get_model_dir() -> std::path::PathBuf {
    std::env::var("SENTINEL_MODEL_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("iot-sentinel")
                .join("models")
        })
}

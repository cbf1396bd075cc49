//! Model Store - Persisted fitted-model artifacts
//!
//! One JSON envelope per (model type, feature version). Writes go through
//! a temp file + rename so a bundle is either fully stored or not stored
//! at all; a failed save never corrupts the previous artifact. Each
//! envelope carries a SHA-256 checksum of the payload, verified on load.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

use super::bundle::{ModelBundle, ModelType};
use crate::logic::error::{CoreError, CoreResult};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Read/write interface the detection engine consumes
pub trait ModelStore: Send + Sync {
    /// Load a bundle, `None` when no artifact exists for the key
    fn load(&self, model_type: ModelType, feature_version: u8) -> CoreResult<Option<ModelBundle>>;

    /// Persist a bundle, overwriting any prior artifact of the same key
    fn save(&self, bundle: &ModelBundle) -> CoreResult<()>;
}

// ============================================================================
// ARTIFACT ENVELOPE
// ============================================================================

/// On-disk wrapper: payload is the serialized bundle, checksum covers the
/// payload bytes exactly as written
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactEnvelope {
    sha256: String,
    payload: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// FILE STORE
// ============================================================================

/// Filesystem-backed model store
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform-local data directory
    pub fn default_location() -> Self {
        Self::new(crate::constants::get_model_dir())
    }

    fn artifact_path(&self, model_type: ModelType, feature_version: u8) -> PathBuf {
        self.dir
            .join(format!("{}_v{}.json", model_type.as_str(), feature_version))
    }
}

impl ModelStore for FileModelStore {
    fn load(&self, model_type: ModelType, feature_version: u8) -> CoreResult<Option<ModelBundle>> {
        let path = self.artifact_path(model_type, feature_version);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&path)
            .map_err(|e| CoreError::PersistenceFailure(format!("read {}: {}", path.display(), e)))?;
        let envelope: ArtifactEnvelope = serde_json::from_slice(&raw).map_err(|e| {
            CoreError::PersistenceFailure(format!("decode {}: {}", path.display(), e))
        })?;

        let actual = sha256_hex(envelope.payload.as_bytes());
        if actual != envelope.sha256 {
            return Err(CoreError::PersistenceFailure(format!(
                "checksum mismatch for {}: expected {}, got {}",
                path.display(),
                envelope.sha256,
                actual
            )));
        }

        let bundle: ModelBundle = serde_json::from_str(&envelope.payload).map_err(|e| {
            CoreError::PersistenceFailure(format!("decode payload {}: {}", path.display(), e))
        })?;

        log::info!(
            "loaded {} bundle (v{}, {} samples) from {}",
            bundle.model_type.as_str(),
            bundle.feature_version,
            bundle.sample_count,
            path.display()
        );
        Ok(Some(bundle))
    }

    fn save(&self, bundle: &ModelBundle) -> CoreResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            CoreError::PersistenceFailure(format!("create {}: {}", self.dir.display(), e))
        })?;

        let payload = serde_json::to_string(bundle)
            .map_err(|e| CoreError::PersistenceFailure(format!("encode bundle: {}", e)))?;
        let envelope = ArtifactEnvelope {
            sha256: sha256_hex(payload.as_bytes()),
            payload,
        };
        let raw = serde_json::to_vec(&envelope)
            .map_err(|e| CoreError::PersistenceFailure(format!("encode envelope: {}", e)))?;

        let path = self.artifact_path(bundle.model_type, bundle.feature_version);
        let tmp = path.with_extension("json.tmp");

        // Write fully to the side, then rename over the old artifact:
        // readers only ever observe a complete file.
        fs::write(&tmp, &raw)
            .map_err(|e| CoreError::PersistenceFailure(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CoreError::PersistenceFailure(format!("commit {}: {}", path.display(), e))
        })?;

        log::info!(
            "saved {} bundle (v{}, {} samples) to {}",
            bundle.model_type.as_str(),
            bundle.feature_version,
            bundle.sample_count,
            path.display()
        );
        Ok(())
    }
}

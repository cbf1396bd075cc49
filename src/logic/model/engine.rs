//! Detection Engine
//!
//! Trains, loads, and serves the two anomaly scorers, fuses their
//! normalized scores, and applies threshold-based decisioning.
//!
//! Concurrency discipline: the ready bundles are the only shared mutable
//! state. `score` clones `Arc` snapshots out of a `parking_lot::RwLock`
//! and never blocks on training; `train`/`retrain` build a new bundle on
//! the side, persist it, and only then swap it into the ready slot, so a
//! reader observes either the old or the new bundle, never a mix. A
//! failed retrain leaves the prior bundle serving.

use ndarray::Array2;
use parking_lot::RwLock;
use std::sync::Arc;

pub use super::CancelToken;
use super::bundle::{
    FittedModel, ModelBundle, ModelSelection, ModelType, ScalerParams, ScoreCalibration,
};
use super::forest::{ForestParams, IsolationForest};
use super::lof::LofModel;
use super::store::{FileModelStore, ModelStore};
use crate::logic::config::{validate_contamination, validate_threshold, CoreConfig, FusionPolicy};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::features::layout::{feature_name, layout_hash, FEATURE_COUNT, FEATURE_VERSION};
use crate::logic::features::FeatureVector;
use crate::logic::schema::{AnomalyResult, AnomalyType, FeatureContribution, NormalizedRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// How many ranked feature contributions an anomaly carries
const TOP_CONTRIBUTIONS: usize = 5;

// ============================================================================
// STATUS & REPORTS
// ============================================================================

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Untrained,
    Training,
    Ready,
    Retraining,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::Untrained => "untrained",
            EngineStatus::Training => "training",
            EngineStatus::Ready => "ready",
            EngineStatus::Retraining => "retraining",
        }
    }
}

/// Per-record model scores, normalized to [0, 1].
///
/// `error` is set (and both scores absent) when the vector was rejected,
/// e.g. wrong layout version or non-numeric values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordScores {
    pub index: usize,
    pub forest: Option<f64>,
    pub lof: Option<f64>,
    pub error: Option<String>,
}

impl RecordScores {
    pub fn is_rejected(&self) -> bool {
        self.error.is_some()
    }
}

/// Output of one `score` call; order matches input order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub scores: Vec<RecordScores>,
    pub rejected_count: usize,
}

/// One positive threshold decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub anomaly_type: AnomalyType,
    pub score: f64,
    pub threshold_used: f64,
}

/// Anomalies plus the underlying scores for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub anomalies: Vec<AnomalyResult>,
    pub scores: ScoreReport,
}

/// Metadata for one ready model, surfaced to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: ModelType,
    pub trained_at: chrono::DateTime<Utc>,
    pub feature_version: u8,
    pub contamination: f64,
    pub sample_count: usize,
    /// Contamination-calibrated decision point in normalized score space
    pub calibrated_threshold: f64,
    pub status: EngineStatus,
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Default)]
struct ReadySlots {
    forest: Option<Arc<ModelBundle>>,
    lof: Option<Arc<ModelBundle>>,
}

impl ReadySlots {
    fn any(&self) -> bool {
        self.forest.is_some() || self.lof.is_some()
    }
}

pub struct DetectionEngine {
    config: CoreConfig,
    store: Arc<dyn ModelStore>,
    slots: RwLock<ReadySlots>,
    status: RwLock<EngineStatus>,
}

impl DetectionEngine {
    /// Build an engine around a model store handle. Starts untrained;
    /// call [`load_persisted`](Self::load_persisted) to pick up stored
    /// bundles.
    pub fn new(config: CoreConfig, store: Arc<dyn ModelStore>) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            slots: RwLock::new(ReadySlots::default()),
            status: RwLock::new(EngineStatus::Untrained),
        })
    }

    /// Engine over a file store rooted at the configured model directory
    pub fn with_file_store(config: CoreConfig) -> CoreResult<Self> {
        let store = Arc::new(FileModelStore::new(config.model_dir.clone()));
        Self::new(config, store)
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.read()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Load any persisted bundles for the current feature version.
    /// Corrupt or incompatible artifacts are skipped with a warning;
    /// returns how many bundles became ready.
    pub fn load_persisted(&self) -> CoreResult<usize> {
        let mut loaded = 0;
        for model_type in [ModelType::IsolationForest, ModelType::LocalOutlierFactor] {
            match self.store.load(model_type, FEATURE_VERSION) {
                Ok(Some(bundle)) if bundle.is_layout_compatible() => {
                    let mut slots = self.slots.write();
                    match model_type {
                        ModelType::IsolationForest => slots.forest = Some(Arc::new(bundle)),
                        ModelType::LocalOutlierFactor => slots.lof = Some(Arc::new(bundle)),
                    }
                    loaded += 1;
                }
                Ok(Some(_)) => {
                    log::warn!(
                        "stored {} bundle has an incompatible layout, ignoring",
                        model_type.as_str()
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("failed to load {} bundle: {}", model_type.as_str(), e);
                }
            }
        }
        if loaded > 0 {
            *self.status.write() = EngineStatus::Ready;
        }
        Ok(loaded)
    }

    // ------------------------------------------------------------------------
    // TRAIN / RETRAIN
    // ------------------------------------------------------------------------

    /// Fit the selected model(s) and atomically publish the new bundles.
    ///
    /// `contamination` is the assumed anomaly fraction in the training
    /// data, consumed by score calibration. Fails with
    /// `InsufficientData` below the configured minimum sample count and
    /// with `PersistenceFailure` when a bundle cannot be stored; neither
    /// failure evicts a previously ready bundle.
    pub fn train(
        &self,
        vectors: &[FeatureVector],
        contamination: f64,
        selection: ModelSelection,
        cancel: Option<&CancelToken>,
    ) -> CoreResult<Vec<ModelInfo>> {
        validate_contamination(contamination)?;

        let valid: Vec<&FeatureVector> = vectors
            .iter()
            .filter(|v| v.is_compatible() && v.is_finite())
            .collect();
        let dropped = vectors.len() - valid.len();
        if dropped > 0 {
            log::warn!("train: dropped {} malformed feature vectors", dropped);
        }

        let required = self.config.effective_min_samples(selection.wants_lof());
        if valid.len() < required {
            return Err(CoreError::InsufficientData {
                required,
                actual: valid.len(),
            });
        }

        {
            let mut status = self.status.write();
            *status = if self.slots.read().any() {
                EngineStatus::Retraining
            } else {
                EngineStatus::Training
            };
        }

        let result = self.fit_and_publish(&valid, contamination, selection, cancel);

        // A failed run keeps whatever was serving before
        *self.status.write() = if self.slots.read().any() {
            EngineStatus::Ready
        } else {
            EngineStatus::Untrained
        };

        result
    }

    /// Retrain with fresh data; safe to call while `score` runs against
    /// the previously ready bundles
    pub fn retrain(
        &self,
        vectors: &[FeatureVector],
        contamination: f64,
        selection: ModelSelection,
        cancel: Option<&CancelToken>,
    ) -> CoreResult<Vec<ModelInfo>> {
        self.train(vectors, contamination, selection, cancel)
    }

    fn fit_and_publish(
        &self,
        vectors: &[&FeatureVector],
        contamination: f64,
        selection: ModelSelection,
        cancel: Option<&CancelToken>,
    ) -> CoreResult<Vec<ModelInfo>> {
        let matrix = to_matrix(vectors);
        let scaler = ScalerParams::fit(matrix.view());
        let mut scaled = matrix;
        scaler.transform(&mut scaled);

        let mut infos = Vec::new();

        if selection.wants_forest() {
            check_cancel(cancel)?;
            let params = ForestParams {
                n_estimators: self.config.n_estimators,
                max_samples: self.config.max_samples,
                seed: self.config.seed,
            };
            let forest = IsolationForest::fit(scaled.view(), &params, cancel)?;
            let raw_scores = forest.training_scores(scaled.view());
            let bundle = self.make_bundle(
                ModelType::IsolationForest,
                contamination,
                vectors.len(),
                scaler.clone(),
                ScoreCalibration::from_training_scores(&raw_scores, contamination),
                FittedModel::Forest(forest),
            );
            infos.push(self.publish(bundle)?);
        }

        if selection.wants_lof() {
            check_cancel(cancel)?;
            let (lof, training_lof) =
                LofModel::fit(scaled.view(), self.config.n_neighbors, cancel)?;
            let bundle = self.make_bundle(
                ModelType::LocalOutlierFactor,
                contamination,
                vectors.len(),
                scaler.clone(),
                ScoreCalibration::from_training_scores(&training_lof, contamination),
                FittedModel::Lof(lof),
            );
            infos.push(self.publish(bundle)?);
        }

        Ok(infos)
    }

    fn make_bundle(
        &self,
        model_type: ModelType,
        contamination: f64,
        sample_count: usize,
        scaler: ScalerParams,
        calibration: ScoreCalibration,
        model: FittedModel,
    ) -> ModelBundle {
        ModelBundle {
            model_type,
            feature_version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            contamination,
            trained_at: Utc::now(),
            sample_count,
            scaler,
            calibration,
            model,
        }
    }

    /// Persist, then swap into the ready slot. Persist failure aborts the
    /// publish and leaves the prior bundle in place.
    fn publish(&self, bundle: ModelBundle) -> CoreResult<ModelInfo> {
        self.store.save(&bundle)?;

        let shared = Arc::new(bundle);
        let info = self.info_of(&shared, EngineStatus::Ready);
        let mut slots = self.slots.write();
        match shared.model_type {
            ModelType::IsolationForest => slots.forest = Some(shared),
            ModelType::LocalOutlierFactor => slots.lof = Some(shared),
        }
        Ok(info)
    }

    // ------------------------------------------------------------------------
    // SCORE
    // ------------------------------------------------------------------------

    /// Score a batch with the selected ready model(s).
    ///
    /// Output order matches input order. Malformed vectors become
    /// per-record errors, never a batch failure; a missing requested
    /// bundle fails the whole call with `ModelNotTrained`.
    pub fn score(
        &self,
        vectors: &[FeatureVector],
        selection: ModelSelection,
    ) -> CoreResult<ScoreReport> {
        let (forest, lof) = self.snapshot(selection)?;
        Ok(Self::score_with(&forest, &lof, vectors))
    }

    /// Score against already-snapshotted bundles, so one call sees one
    /// consistent model generation
    fn score_with(
        forest: &Option<Arc<ModelBundle>>,
        lof: &Option<Arc<ModelBundle>>,
        vectors: &[FeatureVector],
    ) -> ScoreReport {
        let mut scores = Vec::with_capacity(vectors.len());
        let mut rejected_count = 0;

        for (index, vector) in vectors.iter().enumerate() {
            if let Err(e) = vector.validate() {
                rejected_count += 1;
                scores.push(RecordScores {
                    index,
                    forest: None,
                    lof: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
            if !vector.is_finite() {
                rejected_count += 1;
                scores.push(RecordScores {
                    index,
                    forest: None,
                    lof: None,
                    error: Some("non-numeric feature value".to_string()),
                });
                continue;
            }

            scores.push(RecordScores {
                index,
                forest: forest.as_ref().map(|b| b.score(vector.as_slice())),
                lof: lof.as_ref().map(|b| b.score(vector.as_slice())),
                error: None,
            });
        }

        ScoreReport {
            scores,
            rejected_count,
        }
    }

    /// Snapshot the ready bundles this call will use. Readers never hold
    /// the lock while scoring.
    fn snapshot(
        &self,
        selection: ModelSelection,
    ) -> CoreResult<(Option<Arc<ModelBundle>>, Option<Arc<ModelBundle>>)> {
        let slots = self.slots.read();
        let forest = if selection.wants_forest() {
            Some(
                slots
                    .forest
                    .clone()
                    .ok_or(CoreError::ModelNotTrained(ModelType::IsolationForest))?,
            )
        } else {
            None
        };
        let lof = if selection.wants_lof() {
            Some(
                slots
                    .lof
                    .clone()
                    .ok_or(CoreError::ModelNotTrained(ModelType::LocalOutlierFactor))?,
            )
        } else {
            None
        };
        Ok((forest, lof))
    }

    // ------------------------------------------------------------------------
    // DECIDE
    // ------------------------------------------------------------------------

    /// Apply threshold decisioning to a score report. `None` entries are
    /// records below the threshold (or rejected ones).
    pub fn decide(
        &self,
        report: &ScoreReport,
        threshold: Option<f64>,
    ) -> CoreResult<Vec<Option<Decision>>> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        validate_threshold(threshold)?;

        Ok(report
            .scores
            .iter()
            .map(|record| self.fuse(record, threshold))
            .collect())
    }

    fn fuse(&self, record: &RecordScores, threshold: f64) -> Option<Decision> {
        if record.is_rejected() {
            return None;
        }

        let forest_hit = record.forest.map_or(false, |s| s > threshold);
        let lof_hit = record.lof.map_or(false, |s| s > threshold);
        let max_score = record
            .forest
            .into_iter()
            .chain(record.lof)
            .fold(f64::NEG_INFINITY, f64::max);

        match self.config.fusion {
            FusionPolicy::Or => {
                let anomaly_type = match (forest_hit, lof_hit) {
                    (true, true) => AnomalyType::Ensemble,
                    (true, false) => AnomalyType::IsolationForest,
                    (false, true) => AnomalyType::LocalOutlierFactor,
                    (false, false) => return None,
                };
                Some(Decision {
                    anomaly_type,
                    score: max_score,
                    threshold_used: threshold,
                })
            }
            FusionPolicy::And => {
                let all_hit = record.forest.map_or(true, |s| s > threshold)
                    && record.lof.map_or(true, |s| s > threshold)
                    && (forest_hit || lof_hit);
                if !all_hit {
                    return None;
                }
                let anomaly_type = if record.forest.is_some() && record.lof.is_some() {
                    AnomalyType::Ensemble
                } else if record.forest.is_some() {
                    AnomalyType::IsolationForest
                } else {
                    AnomalyType::LocalOutlierFactor
                };
                Some(Decision {
                    anomaly_type,
                    score: max_score,
                    threshold_used: threshold,
                })
            }
            FusionPolicy::Weighted {
                forest_weight,
                lof_weight,
            } => {
                let mut weighted = 0.0;
                let mut total = 0.0;
                if let Some(s) = record.forest {
                    weighted += s * forest_weight;
                    total += forest_weight;
                }
                if let Some(s) = record.lof {
                    weighted += s * lof_weight;
                    total += lof_weight;
                }
                if total <= 0.0 {
                    return None;
                }
                let fused = weighted / total;
                if fused <= threshold {
                    return None;
                }
                Some(Decision {
                    anomaly_type: AnomalyType::Ensemble,
                    score: fused,
                    threshold_used: threshold,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // DETECT (score + decide + assemble results)
    // ------------------------------------------------------------------------

    /// Full pass over a batch: score, decide, and assemble anomaly
    /// results with ranked feature contributions.
    pub fn detect(
        &self,
        records: &[NormalizedRecord],
        vectors: &[FeatureVector],
        selection: ModelSelection,
        threshold: Option<f64>,
    ) -> CoreResult<DetectionReport> {
        if records.len() != vectors.len() {
            return Err(CoreError::InvalidParameter {
                name: "vectors",
                detail: format!(
                    "{} vectors do not align with {} records",
                    vectors.len(),
                    records.len()
                ),
            });
        }

        let (forest, lof) = self.snapshot(selection)?;
        let report = Self::score_with(&forest, &lof, vectors);
        let decisions = self.decide(&report, threshold)?;

        // Contributions rank against whichever scaler is available; both
        // bundles of one training run share it.
        let reference = forest.as_ref().or(lof.as_ref());

        let mut anomalies = Vec::new();
        for (i, decision) in decisions.iter().enumerate() {
            let Some(decision) = decision else { continue };
            let record = &records[i];

            anomalies.push(AnomalyResult {
                id: uuid::Uuid::new_v4().to_string(),
                device_id: record.device_id.clone(),
                timestamp: record.timestamp,
                anomaly_type: decision.anomaly_type,
                score: decision.score,
                threshold_used: decision.threshold_used,
                affected_features: reference
                    .map(|bundle| ranked_contributions(bundle, &vectors[i]))
                    .unwrap_or_default(),
                description: describe(decision, record),
                resolved: false,
            });
        }

        log::info!(
            "detected {} anomalies in {} records ({} rejected)",
            anomalies.len(),
            records.len(),
            report.rejected_count
        );

        Ok(DetectionReport {
            anomalies,
            scores: report,
        })
    }

    // ------------------------------------------------------------------------
    // INFO
    // ------------------------------------------------------------------------

    /// Metadata for every ready model
    pub fn model_info(&self) -> Vec<ModelInfo> {
        let status = self.status();
        let slots = self.slots.read();
        [slots.forest.as_ref(), slots.lof.as_ref()]
            .into_iter()
            .flatten()
            .map(|bundle| self.info_of(bundle, status))
            .collect()
    }

    fn info_of(&self, bundle: &ModelBundle, status: EngineStatus) -> ModelInfo {
        ModelInfo {
            model_type: bundle.model_type,
            trained_at: bundle.trained_at,
            feature_version: bundle.feature_version,
            contamination: bundle.contamination,
            sample_count: bundle.sample_count,
            calibrated_threshold: bundle.calibration.threshold,
            status,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn to_matrix(vectors: &[&FeatureVector]) -> Array2<f64> {
    let mut flat = Vec::with_capacity(vectors.len() * FEATURE_COUNT);
    for vector in vectors {
        flat.extend(vector.values.iter().map(|&v| v as f64));
    }
    Array2::from_shape_vec((vectors.len(), FEATURE_COUNT), flat)
        .expect("vector length is fixed by the layout")
}

fn check_cancel(cancel: Option<&CancelToken>) -> CoreResult<()> {
    if let Some(token) = cancel {
        if token.is_cancelled() {
            return Err(CoreError::TrainingCancelled);
        }
    }
    Ok(())
}

fn ranked_contributions(bundle: &ModelBundle, vector: &FeatureVector) -> Vec<FeatureContribution> {
    let zscores = bundle.scaler.transform_row(vector.as_slice());
    let mut order: Vec<usize> = (0..FEATURE_COUNT).collect();
    order.sort_by(|&a, &b| {
        zscores[b]
            .abs()
            .partial_cmp(&zscores[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    order
        .into_iter()
        .take(TOP_CONTRIBUTIONS)
        .map(|j| FeatureContribution {
            name: feature_name(j).unwrap_or("?").to_string(),
            value: vector.values[j],
            deviation: zscores[j].abs(),
        })
        .collect()
}

fn describe(decision: &Decision, record: &NormalizedRecord) -> String {
    let model = match decision.anomaly_type {
        AnomalyType::IsolationForest => "Isolation Forest",
        AnomalyType::LocalOutlierFactor => "Local Outlier Factor",
        AnomalyType::Ensemble => "Ensemble",
    };
    format!(
        "{} score {:.3} exceeded threshold {:.2} for device {} ({} {} -> {})",
        model,
        decision.score,
        decision.threshold_used,
        record.device_id,
        record.protocol.as_str(),
        record.source_ip,
        record.dest_ip
    )
}

//! Integration tests for the detection engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::bundle::{ModelBundle, ModelSelection, ModelType};
use super::engine::{DetectionEngine, EngineStatus, RecordScores, ScoreReport};
use super::store::{FileModelStore, ModelStore};
use super::CancelToken;
use crate::logic::config::{CoreConfig, FusionPolicy};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::features::{extract_batch, FeatureVector, FEATURE_VERSION};
use crate::logic::schema::{AnomalyType, ConnState, NormalizedRecord, Protocol};

// ============================================================================
// FIXTURES
// ============================================================================

/// Ordinary web-ish flow with a little jitter
fn inlier_record(rng: &mut StdRng) -> NormalizedRecord {
    NormalizedRecord {
        device_id: "12".to_string(),
        source_ip: "192.168.1.12".to_string(),
        dest_ip: "10.0.0.1".to_string(),
        source_port: rng.gen_range(49152..65000),
        dest_port: 80,
        protocol: Protocol::Tcp,
        service: "http".to_string(),
        duration: rng.gen_range(0.5..3.0),
        orig_bytes: rng.gen_range(400..1600),
        resp_bytes: rng.gen_range(2000..8000),
        packet_count: rng.gen_range(8..40),
        conn_state: ConnState::Sf,
        ..Default::default()
    }
}

/// Exfiltration-shaped flow: huge one-way transfer, strange port
fn outlier_record(rng: &mut StdRng) -> NormalizedRecord {
    NormalizedRecord {
        device_id: "66".to_string(),
        source_ip: "192.168.1.66".to_string(),
        dest_ip: "203.0.113.9".to_string(),
        source_port: rng.gen_range(49152..65000),
        dest_port: 55000,
        protocol: Protocol::Udp,
        service: "unknown".to_string(),
        duration: rng.gen_range(0.0..0.01),
        orig_bytes: rng.gen_range(50_000_000..500_000_000),
        resp_bytes: 0,
        packet_count: rng.gen_range(50_000..200_000),
        conn_state: ConnState::S0,
        ..Default::default()
    }
}

fn synthetic_vectors(inliers: usize, outliers: usize) -> Vec<FeatureVector> {
    let mut rng = StdRng::seed_from_u64(99);
    let mut records: Vec<NormalizedRecord> =
        (0..inliers).map(|_| inlier_record(&mut rng)).collect();
    records.extend((0..outliers).map(|_| outlier_record(&mut rng)));
    extract_batch(&records)
}

fn engine_with_tempdir() -> (DetectionEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let store = Arc::new(FileModelStore::new(dir.path()));
    (DetectionEngine::new(config, store).unwrap(), dir)
}

fn plain_scores(forest: Option<f64>, lof: Option<f64>) -> ScoreReport {
    ScoreReport {
        scores: vec![RecordScores {
            index: 0,
            forest,
            lof,
            error: None,
        }],
        rejected_count: 0,
    }
}

/// Store that can be switched to fail every save
struct FlakyStore {
    inner: FileModelStore,
    fail: AtomicBool,
}

impl FlakyStore {
    fn new(dir: &std::path::Path) -> Self {
        Self {
            inner: FileModelStore::new(dir),
            fail: AtomicBool::new(false),
        }
    }
}

impl ModelStore for FlakyStore {
    fn load(&self, model_type: ModelType, feature_version: u8) -> CoreResult<Option<ModelBundle>> {
        self.inner.load(model_type, feature_version)
    }

    fn save(&self, bundle: &ModelBundle) -> CoreResult<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CoreError::PersistenceFailure("disk full".to_string()));
        }
        self.inner.save(bundle)
    }
}

// ============================================================================
// TRAINING & CALIBRATION
// ============================================================================

#[test]
fn test_contamination_calibration_flags_expected_fraction() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(900, 100);

    engine
        .train(&vectors, 0.1, ModelSelection::Both, None)
        .unwrap();
    assert_eq!(engine.status(), EngineStatus::Ready);

    // Decide at the forest's calibrated threshold: roughly the assumed
    // contamination fraction should come back flagged.
    let info = engine
        .model_info()
        .into_iter()
        .find(|i| i.model_type == ModelType::IsolationForest)
        .unwrap();

    let report = engine
        .score(&vectors, ModelSelection::IsolationForest)
        .unwrap();
    let decisions = engine
        .decide(&report, Some(info.calibrated_threshold.clamp(0.01, 0.99)))
        .unwrap();
    let flagged = decisions.iter().filter(|d| d.is_some()).count();

    assert!(
        (60..=160).contains(&flagged),
        "expected ~100 of 1000 flagged, got {}",
        flagged
    );
}

#[test]
fn test_outliers_score_above_inliers() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(300, 30);
    engine
        .train(&vectors, 0.1, ModelSelection::Both, None)
        .unwrap();

    let report = engine.score(&vectors, ModelSelection::Both).unwrap();
    let forest_mean = |range: std::ops::Range<usize>| -> f64 {
        let n = range.len() as f64;
        report.scores[range].iter().map(|s| s.forest.unwrap()).sum::<f64>() / n
    };

    assert!(forest_mean(300..330) > forest_mean(0..300) + 0.3);
}

#[test]
fn test_empty_training_set_rejected_without_artifact() {
    let (engine, dir) = engine_with_tempdir();

    let result = engine.train(&[], 0.1, ModelSelection::Both, None);
    assert!(matches!(result, Err(CoreError::InsufficientData { .. })));
    assert_eq!(engine.status(), EngineStatus::Untrained);

    let store = FileModelStore::new(dir.path());
    assert!(store
        .load(ModelType::IsolationForest, FEATURE_VERSION)
        .unwrap()
        .is_none());
}

#[test]
fn test_failed_retrain_keeps_prior_bundle_readable() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(200, 20);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();

    let result = engine.train(&[], 0.1, ModelSelection::IsolationForest, None);
    assert!(matches!(result, Err(CoreError::InsufficientData { .. })));

    // Prior model still serves
    assert_eq!(engine.status(), EngineStatus::Ready);
    assert!(engine
        .score(&vectors[..5], ModelSelection::IsolationForest)
        .is_ok());
}

#[test]
fn test_invalid_contamination_rejected() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(100, 0);

    for bad in [0.0, 0.5, -0.1, f64::NAN] {
        let result = engine.train(&vectors, bad, ModelSelection::Both, None);
        assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
    }
}

#[test]
fn test_cancelled_training_keeps_prior_model() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(200, 20);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();
    let before = engine.model_info();

    let token = CancelToken::new();
    token.cancel();
    let result = engine.train(&vectors, 0.2, ModelSelection::IsolationForest, Some(&token));
    assert!(matches!(result, Err(CoreError::TrainingCancelled)));

    let after = engine.model_info();
    assert_eq!(before[0].trained_at, after[0].trained_at);
    assert_eq!(engine.status(), EngineStatus::Ready);
}

#[test]
fn test_persistence_failure_aborts_publish() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FlakyStore::new(dir.path()));
    let config = CoreConfig {
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let engine = DetectionEngine::new(config, store.clone()).unwrap();

    let vectors = synthetic_vectors(200, 20);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();
    let before = engine.model_info();

    store.fail.store(true, Ordering::Relaxed);
    let result = engine.retrain(&vectors, 0.2, ModelSelection::IsolationForest, None);
    assert!(matches!(result, Err(CoreError::PersistenceFailure(_))));

    // The ready slot and the stored artifact are both the prior run
    let after = engine.model_info();
    assert_eq!(before[0].trained_at, after[0].trained_at);
    assert_eq!(before[0].contamination, after[0].contamination);
    assert!(engine
        .score(&vectors[..3], ModelSelection::IsolationForest)
        .is_ok());
}

// ============================================================================
// SCORING
// ============================================================================

#[test]
fn test_score_untrained_fails() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(3, 0);

    let result = engine.score(&vectors, ModelSelection::Both);
    assert!(matches!(result, Err(CoreError::ModelNotTrained(_))));
}

#[test]
fn test_missing_lof_bundle_reported_by_type() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(100, 10);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();

    match engine.score(&vectors[..3], ModelSelection::Both) {
        Err(CoreError::ModelNotTrained(model_type)) => {
            assert_eq!(model_type, ModelType::LocalOutlierFactor)
        }
        other => panic!("expected ModelNotTrained, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_malformed_vectors_rejected_per_record() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(100, 10);
    engine
        .train(&vectors, 0.1, ModelSelection::Both, None)
        .unwrap();

    let mut batch = vectors[..4].to_vec();
    batch[1].version = FEATURE_VERSION + 1; // stale layout
    batch[2].values[0] = f32::NAN;

    let report = engine.score(&batch, ModelSelection::Both).unwrap();
    assert_eq!(report.scores.len(), 4);
    assert_eq!(report.rejected_count, 2);
    assert!(report.scores[0].forest.is_some());
    assert!(report.scores[1].is_rejected());
    assert!(report.scores[2].is_rejected());
    assert!(report.scores[3].lof.is_some());
}

#[test]
fn test_score_output_order_matches_input() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(100, 10);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();

    let report = engine
        .score(&vectors, ModelSelection::IsolationForest)
        .unwrap();
    for (i, score) in report.scores.iter().enumerate() {
        assert_eq!(score.index, i);
    }
}

// ============================================================================
// DECIDE / FUSION
// ============================================================================

#[test]
fn test_or_fusion_single_model_trigger_names_that_model() {
    let (engine, _dir) = engine_with_tempdir();

    // Only the forest exceeds the threshold: OR still flags, and the
    // anomaly names only the triggering model.
    let decisions = engine
        .decide(&plain_scores(Some(0.92), Some(0.31)), Some(0.7))
        .unwrap();
    let decision = decisions[0].as_ref().expect("record should be flagged");
    assert_eq!(decision.anomaly_type, AnomalyType::IsolationForest);
    assert!((decision.score - 0.92).abs() < 1e-9);

    let decisions = engine
        .decide(&plain_scores(Some(0.12), Some(0.88)), Some(0.7))
        .unwrap();
    assert_eq!(
        decisions[0].as_ref().unwrap().anomaly_type,
        AnomalyType::LocalOutlierFactor
    );

    let decisions = engine
        .decide(&plain_scores(Some(0.95), Some(0.88)), Some(0.7))
        .unwrap();
    assert_eq!(
        decisions[0].as_ref().unwrap().anomaly_type,
        AnomalyType::Ensemble
    );

    let decisions = engine
        .decide(&plain_scores(Some(0.2), Some(0.3)), Some(0.7))
        .unwrap();
    assert!(decisions[0].is_none());
}

#[test]
fn test_and_fusion_requires_every_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        fusion: FusionPolicy::And,
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let store = Arc::new(FileModelStore::new(dir.path()));
    let engine = DetectionEngine::new(config, store).unwrap();

    let decisions = engine
        .decide(&plain_scores(Some(0.92), Some(0.31)), Some(0.7))
        .unwrap();
    assert!(decisions[0].is_none());

    let decisions = engine
        .decide(&plain_scores(Some(0.92), Some(0.81)), Some(0.7))
        .unwrap();
    assert_eq!(
        decisions[0].as_ref().unwrap().anomaly_type,
        AnomalyType::Ensemble
    );
}

#[test]
fn test_weighted_fusion_uses_weighted_mean() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        fusion: FusionPolicy::Weighted {
            forest_weight: 3.0,
            lof_weight: 1.0,
        },
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let store = Arc::new(FileModelStore::new(dir.path()));
    let engine = DetectionEngine::new(config, store).unwrap();

    // (0.9*3 + 0.3*1) / 4 = 0.75
    let decisions = engine
        .decide(&plain_scores(Some(0.9), Some(0.3)), Some(0.7))
        .unwrap();
    let decision = decisions[0].as_ref().unwrap();
    assert!((decision.score - 0.75).abs() < 1e-9);
    assert_eq!(decision.anomaly_type, AnomalyType::Ensemble);
}

#[test]
fn test_invalid_threshold_rejected() {
    let (engine, _dir) = engine_with_tempdir();
    let result = engine.decide(&plain_scores(Some(0.9), None), Some(1.5));
    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
}

// ============================================================================
// DETECT (end to end)
// ============================================================================

#[test]
fn test_detect_assembles_anomaly_results() {
    let (engine, _dir) = engine_with_tempdir();
    let mut rng = StdRng::seed_from_u64(5);
    let mut records: Vec<NormalizedRecord> =
        (0..300).map(|_| inlier_record(&mut rng)).collect();
    records.extend((0..20).map(|_| outlier_record(&mut rng)));
    let vectors = extract_batch(&records);

    engine
        .train(&vectors, 0.1, ModelSelection::Both, None)
        .unwrap();

    let report = engine
        .detect(&records, &vectors, ModelSelection::Both, Some(0.8))
        .unwrap();

    assert!(!report.anomalies.is_empty());
    for anomaly in &report.anomalies {
        assert!(anomaly.score > 0.8);
        assert_eq!(anomaly.threshold_used, 0.8);
        assert!(!anomaly.resolved);
        assert!(!anomaly.affected_features.is_empty());
        assert!(!anomaly.id.is_empty());
        // Contributions arrive ranked, most deviant first
        let devs: Vec<f64> = anomaly
            .affected_features
            .iter()
            .map(|c| c.deviation)
            .collect();
        assert!(devs.windows(2).all(|w| w[0] >= w[1]));
    }

    // The planted outliers dominate the flagged set
    let outlier_hits = report
        .anomalies
        .iter()
        .filter(|a| a.device_id == "66")
        .count();
    assert!(outlier_hits >= report.anomalies.len() / 2);
}

#[test]
fn test_detect_rejects_misaligned_inputs() {
    let (engine, _dir) = engine_with_tempdir();
    let vectors = synthetic_vectors(100, 10);
    engine
        .train(&vectors, 0.1, ModelSelection::IsolationForest, None)
        .unwrap();

    let records = vec![NormalizedRecord::default(); 3];
    let result = engine.detect(&records, &vectors[..2], ModelSelection::IsolationForest, None);
    assert!(matches!(result, Err(CoreError::InvalidParameter { .. })));
}

// ============================================================================
// PERSISTENCE & CONCURRENCY
// ============================================================================

#[test]
fn test_load_persisted_restores_ready_state() {
    let dir = tempfile::tempdir().unwrap();
    let vectors = synthetic_vectors(200, 20);

    {
        let store = Arc::new(FileModelStore::new(dir.path()));
        let config = CoreConfig {
            model_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let engine = DetectionEngine::new(config, store).unwrap();
        engine
            .train(&vectors, 0.1, ModelSelection::Both, None)
            .unwrap();
    }

    // Fresh engine over the same store picks the bundles back up
    let store = Arc::new(FileModelStore::new(dir.path()));
    let config = CoreConfig {
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let engine = DetectionEngine::new(config, store).unwrap();
    assert_eq!(engine.status(), EngineStatus::Untrained);

    let loaded = engine.load_persisted().unwrap();
    assert_eq!(loaded, 2);
    assert_eq!(engine.status(), EngineStatus::Ready);
    assert!(engine.score(&vectors[..5], ModelSelection::Both).is_ok());
}

#[test]
fn test_concurrent_score_during_retrain() {
    let (engine, _dir) = engine_with_tempdir();
    let engine = Arc::new(engine);
    let vectors = synthetic_vectors(200, 20);
    engine
        .train(&vectors, 0.1, ModelSelection::Both, None)
        .unwrap();

    let scorer = {
        let engine = Arc::clone(&engine);
        let vectors = vectors.clone();
        std::thread::spawn(move || {
            // Each call snapshots whichever bundle is ready at that
            // moment: pre- or post-retrain, never a partial one.
            for _ in 0..50 {
                let report = engine
                    .score(&vectors[..20], ModelSelection::Both)
                    .expect("score must not observe a partial bundle");
                assert_eq!(report.scores.len(), 20);
                assert_eq!(report.rejected_count, 0);
            }
        })
    };

    let retrained = engine
        .retrain(&vectors, 0.2, ModelSelection::Both, None)
        .unwrap();
    assert_eq!(retrained.len(), 2);

    scorer.join().expect("scoring thread panicked");
    assert_eq!(engine.status(), EngineStatus::Ready);
}

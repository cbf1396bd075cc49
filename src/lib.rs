//! IoT Sentinel Core - Traffic Anomaly Detection Engine
//!
//! Format-agnostic ingestion of network traffic records, deterministic
//! feature extraction, and dual-model unsupervised anomaly scoring
//! (Isolation Forest + Local Outlier Factor).
//!
//! The web API, persistence, and device simulator live in sibling
//! services; this crate exposes the detection core they call into.

pub mod constants;
pub mod logic;

pub use logic::adapters::{select_adapter, AdapterKind, AdapterOptions, TrafficAdapter};
pub use logic::config::{CoreConfig, FusionPolicy};
pub use logic::engine::{
    CancelToken, Decision, DetectionEngine, DetectionReport, EngineStatus, ModelInfo,
    RecordScores, ScoreReport,
};
pub use logic::error::{CoreError, CoreResult};
pub use logic::features::{FeatureVector, FEATURE_COUNT, FEATURE_VERSION};
pub use logic::model::bundle::{ModelBundle, ModelSelection, ModelType};
pub use logic::model::store::{FileModelStore, ModelStore};
pub use logic::pipeline::{extract_features, ingest};
pub use logic::schema::{
    AnomalyResult, AnomalyType, ConnState, FeatureContribution, IngestReport, NormalizedRecord,
    Protocol, RecordError, TrafficLabel,
};

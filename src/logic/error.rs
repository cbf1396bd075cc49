//! Core error taxonomy.
//!
//! Per-record problems during ingestion are counted in the batch report
//! (`schema::RecordError`), never surfaced through this enum. Everything
//! here aborts the specific call that produced it.

use crate::logic::model::bundle::ModelType;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug)]
pub enum CoreError {
    /// No adapter matches the input and no override was given
    UnsupportedFormat(String),

    /// A required field/column is missing and has no default
    SchemaMismatch { field: String, detail: String },

    /// Training set below the minimum viable sample count
    InsufficientData { required: usize, actual: usize },

    /// Scoring requested for a model type with no ready bundle
    ModelNotTrained(ModelType),

    /// Model store read/write failure; prior bundles remain intact
    PersistenceFailure(String),

    /// Out-of-range contamination/threshold/selection/config value
    InvalidParameter { name: &'static str, detail: String },

    /// Container-level ingest failure (unreadable file, corrupt capture
    /// header, undecodable document)
    SourceUnreadable(String),

    /// Cooperative cancellation observed between fitting phases
    TrainingCancelled,
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::UnsupportedFormat(detail) => {
                write!(f, "Unsupported format: {}", detail)
            }
            CoreError::SchemaMismatch { field, detail } => {
                write!(f, "Schema mismatch on '{}': {}", field, detail)
            }
            CoreError::InsufficientData { required, actual } => {
                write!(
                    f,
                    "Insufficient training data: need at least {} samples, got {}",
                    required, actual
                )
            }
            CoreError::ModelNotTrained(model_type) => {
                write!(f, "Model not trained: {}", model_type.as_str())
            }
            CoreError::PersistenceFailure(detail) => {
                write!(f, "Model store failure: {}", detail)
            }
            CoreError::InvalidParameter { name, detail } => {
                write!(f, "Invalid parameter '{}': {}", name, detail)
            }
            CoreError::SourceUnreadable(detail) => {
                write!(f, "Source unreadable: {}", detail)
            }
            CoreError::TrainingCancelled => write!(f, "Training cancelled"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::SourceUnreadable(err.to_string())
    }
}

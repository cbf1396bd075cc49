//! Logic Module - Detection Core Engines
//!
//! - `adapters/` - Source-format adapters + factory
//! - `features/` - Feature extraction (layout, vector, extract)
//! - `model/`    - Anomaly models (forest, lof, bundle, store, engine)
//! - `pipeline`  - Ingestion/extraction facade for callers

pub mod adapters;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod schema;

pub use model::engine;

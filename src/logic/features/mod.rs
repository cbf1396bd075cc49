//! Features Module - Feature Extraction Engine
//!
//! Maps a [`NormalizedRecord`](crate::logic::schema::NormalizedRecord) to a
//! fixed-order numeric vector. The layout is versioned; a trained model only
//! applies to vectors built with the matching layout.

pub mod extract;
pub mod layout;
pub mod vector;


pub use extract::{extract, extract_batch, port_category, service_category, PortCategory};
pub use layout::{FEATURE_COUNT, FEATURE_VERSION};
pub use vector::FeatureVector;

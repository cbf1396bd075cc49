//! Adapters Module - Source-format normalization
//!
//! One adapter per source format, all emitting the common schema. The
//! factory picks a variant from an explicit caller hint or, failing
//! that, from the file extension. Per-record problems are counted in
//! the [`IngestReport`](crate::logic::schema::IngestReport); only
//! container-level failures abort a parse.

pub mod capture;
pub mod delimited;
pub mod document;
pub mod labeled;


use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::Path;

use crate::constants;
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::schema::IngestReport;

// ============================================================================
// ADAPTER CONTRACT
// ============================================================================

/// Which adapter variant handles a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Delimited text (CSV and friends)
    Delimited,
    /// Structured documents (JSON)
    Document,
    /// Packet captures, reconstructed into flows
    Capture,
    /// The labeled reference intrusion dataset (Zeek-style TSV)
    Labeled,
}

impl AdapterKind {
    /// Parse a caller-facing hint string
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" | "delimited" => Some(AdapterKind::Delimited),
            "json" | "document" => Some(AdapterKind::Document),
            "pcap" | "capture" => Some(AdapterKind::Capture),
            "iot23" | "labeled" | "dataset" => Some(AdapterKind::Labeled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Delimited => "delimited",
            AdapterKind::Document => "document",
            AdapterKind::Capture => "capture",
            AdapterKind::Labeled => "labeled",
        }
    }
}

/// Contract every adapter variant fulfils
pub trait TrafficAdapter {
    fn kind(&self) -> AdapterKind;

    /// Parse a source into normalized records. Recoverable per-record
    /// issues are counted in the report; only container-level problems
    /// return an error.
    fn parse(&self, path: &Path) -> CoreResult<IngestReport>;
}

/// Per-call adapter tuning
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Explicit column/field mapping (standard name -> source name);
    /// auto-detected when absent
    pub column_mapping: Option<HashMap<String, String>>,
    /// Dot path into a structured document (e.g. "data.flows")
    pub document_path: Option<String>,
    /// Idle seconds before a capture flow is cut
    pub flow_timeout_secs: u64,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            column_mapping: None,
            document_path: None,
            flow_timeout_secs: constants::DEFAULT_FLOW_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Select an adapter for a source. An explicit hint always wins;
/// otherwise the file extension decides. No match and no hint is an
/// `UnsupportedFormat` error.
pub fn select_adapter(
    path: &Path,
    hint: Option<AdapterKind>,
    options: &AdapterOptions,
) -> CoreResult<Box<dyn TrafficAdapter>> {
    let kind = match hint {
        Some(kind) => kind,
        None => sniff_kind(path).ok_or_else(|| {
            CoreError::UnsupportedFormat(format!(
                "no adapter matches '{}' and no type override was given",
                path.display()
            ))
        })?,
    };

    log::info!("selected {} adapter for {}", kind.as_str(), path.display());
    Ok(build_adapter(kind, options))
}

fn build_adapter(kind: AdapterKind, options: &AdapterOptions) -> Box<dyn TrafficAdapter> {
    match kind {
        AdapterKind::Delimited => Box::new(delimited::DelimitedAdapter::new(
            options.column_mapping.clone(),
        )),
        AdapterKind::Document => Box::new(document::DocumentAdapter::new(
            options.column_mapping.clone(),
            options.document_path.clone(),
        )),
        AdapterKind::Capture => {
            Box::new(capture::CaptureAdapter::new(options.flow_timeout_secs))
        }
        AdapterKind::Labeled => Box::new(labeled::LabeledAdapter::new()),
    }
}

/// Extension/content sniffing, lowest-precedence selection path
fn sniff_kind(path: &Path) -> Option<AdapterKind> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if name.contains("conn.log") {
        return Some(AdapterKind::Labeled);
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(AdapterKind::Delimited),
        "json" | "jsonl" => Some(AdapterKind::Document),
        "pcap" | "pcapng" | "cap" => Some(AdapterKind::Capture),
        "log" | "tsv" => Some(AdapterKind::Labeled),
        _ => None,
    }
}

// ============================================================================
// SHARED FIELD PARSING
// ============================================================================

/// Parse a timestamp in any of the shapes the sources use: RFC 3339,
/// `YYYY-MM-DD HH:MM:SS`, or a unix epoch (integer or fractional)
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(epoch) = value.parse::<f64>() {
        if epoch.is_finite() && epoch >= 0.0 {
            let secs = epoch.trunc() as i64;
            let nanos = (epoch.fract() * 1e9) as u32;
            return DateTime::from_timestamp(secs, nanos);
        }
    }
    None
}

/// Parse a port, tolerating the float renderings CSV exports produce
pub(crate) fn parse_port(value: &str) -> Option<u16> {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        return Some(0);
    }
    let number = value.parse::<f64>().ok()?;
    if !number.is_finite() || number < 0.0 || number > u16::MAX as f64 || number.fract() != 0.0 {
        return None;
    }
    Some(number as u16)
}

/// Parse a non-negative count; `-` and empty are the zero sentinel
pub(crate) fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        return Some(0);
    }
    let number = value.parse::<f64>().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(number as u64)
}

/// Parse a non-negative duration in seconds; `-` and empty are 0
pub(crate) fn parse_duration(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() || value == "-" {
        return Some(0.0);
    }
    let number = value.parse::<f64>().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(number)
}

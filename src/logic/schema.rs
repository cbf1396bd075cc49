//! Common traffic schema.
//!
//! Every adapter variant normalizes its source into [`NormalizedRecord`];
//! no partially-initialized records reach the feature extractor. Missing
//! values are explicit sentinels (zero counts, `"unknown"` strings,
//! `Other` enum buckets), never absent fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD ENUMS
// ============================================================================

/// Transport protocol of a traffic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    /// Tolerant parse; anything unrecognized lands in the `Other` bucket
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" | "6" => Protocol::Tcp,
            "udp" | "17" => Protocol::Udp,
            "icmp" | "1" => Protocol::Icmp,
            _ => Protocol::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other => "other",
        }
    }
}

/// Connection-state tag (Zeek-style), collapsed to the states the
/// feature layout distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnState {
    /// Normal establishment and termination
    Sf,
    /// Connection attempt seen, no reply
    S0,
    /// Connection attempt rejected
    Rej,
    /// Reset by either endpoint
    Rst,
    Other,
}

impl ConnState {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "SF" | "S1" => ConnState::Sf,
            "S0" => ConnState::S0,
            "REJ" => ConnState::Rej,
            "RSTO" | "RSTR" | "RSTOS0" | "RSTRH" | "RST" => ConnState::Rst,
            _ => ConnState::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Sf => "SF",
            ConnState::S0 => "S0",
            ConnState::Rej => "REJ",
            ConnState::Rst => "RST",
            ConnState::Other => "OTHER",
        }
    }
}

/// Ground-truth tag carried by labeled datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLabel {
    Benign,
    Malicious,
    Unlabeled,
}

impl TrafficLabel {
    pub fn parse(value: &str) -> Self {
        let lower = value.trim().to_ascii_lowercase();
        if lower.contains("malicious") || lower.contains("attack") || lower == "anomaly" {
            TrafficLabel::Malicious
        } else if lower.contains("benign") || lower == "normal" {
            TrafficLabel::Benign
        } else {
            TrafficLabel::Unlabeled
        }
    }
}

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

/// The common schema every adapter emits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub device_id: String,
    /// Absent when the source carries no timing information
    pub timestamp: Option<DateTime<Utc>>,
    pub source_ip: String,
    pub dest_ip: String,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: Protocol,
    pub service: String,
    /// Seconds, >= 0
    pub duration: f64,
    pub orig_bytes: u64,
    pub resp_bytes: u64,
    /// Total packets observed for the record (0 when the source does not
    /// report packet counts)
    pub packet_count: u64,
    pub conn_state: ConnState,
    pub label: TrafficLabel,
}

impl Default for NormalizedRecord {
    fn default() -> Self {
        Self {
            device_id: "0".to_string(),
            timestamp: None,
            source_ip: "unknown".to_string(),
            dest_ip: "unknown".to_string(),
            source_port: 0,
            dest_port: 0,
            protocol: Protocol::Other,
            service: "unknown".to_string(),
            duration: 0.0,
            orig_bytes: 0,
            resp_bytes: 0,
            packet_count: 0,
            conn_state: ConnState::Other,
            label: TrafficLabel::Unlabeled,
        }
    }
}

impl NormalizedRecord {
    /// Derive a device identifier from an IPv4 address (last octet),
    /// the convention used for unlabeled capture sources
    pub fn device_id_from_ip(ip: &str) -> String {
        ip.rsplit('.')
            .next()
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| octet.to_string())
            .unwrap_or_else(|| "0".to_string())
    }
}

// ============================================================================
// INGEST ACCOUNTING
// ============================================================================

/// One recoverable per-record problem, counted not raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    /// Zero-based position in the source (row, document index, packet number)
    pub index: usize,
    pub reason: String,
}

/// Result of one ingestion call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub records: Vec<NormalizedRecord>,
    pub parsed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<RecordError>,
}

impl IngestReport {
    pub fn push_record(&mut self, record: NormalizedRecord) {
        self.records.push(record);
        self.parsed_count += 1;
    }

    pub fn skip(&mut self, index: usize, reason: impl Into<String>) {
        self.skipped_count += 1;
        self.errors.push(RecordError {
            index,
            reason: reason.into(),
        });
    }
}

// ============================================================================
// ANOMALY RESULT
// ============================================================================

/// Which model flagged the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyType {
    IsolationForest,
    LocalOutlierFactor,
    /// Both models triggered, or the decision came from a fused score
    Ensemble,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::IsolationForest => "isolation_forest",
            AnomalyType::LocalOutlierFactor => "local_outlier_factor",
            AnomalyType::Ensemble => "ensemble",
        }
    }
}

/// One ranked feature contribution attached to an anomaly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub name: String,
    pub value: f32,
    /// Absolute z-score against the training distribution
    pub deviation: f64,
}

/// Anomaly decision for one scored record.
///
/// Created by the detection engine; `resolved` is mutated later by an
/// external workflow, never by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub id: String,
    pub device_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub anomaly_type: AnomalyType,
    /// Normalized to [0, 1], 1 = most anomalous
    pub score: f64,
    pub threshold_used: f64,
    /// Ranked, most deviant feature first
    pub affected_features: Vec<FeatureContribution>,
    pub description: String,
    pub resolved: bool,
}

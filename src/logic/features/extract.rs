//! Record → feature vector extraction.
//!
//! Pure and deterministic: the only state is the fixed vocabulary tables
//! below. Log transforms compress the heavy-tailed byte/rate fields;
//! cyclical sine/cosine encoding keeps hour 23 adjacent to hour 0; port
//! numbers collapse into the three operational categories.

use chrono::{Datelike, Timelike};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::f64::consts::TAU;

use super::layout::feature_index;
use super::vector::FeatureVector;
use crate::logic::schema::{ConnState, NormalizedRecord, Protocol};

/// Floor applied to duration before any rate division
const DURATION_FLOOR: f64 = 1e-3;

// ============================================================================
// PORT CATEGORIES
// ============================================================================

/// Operational port category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCategory {
    /// < 1024
    WellKnown,
    /// 1024-49151
    Registered,
    /// >= 49152
    Dynamic,
}

/// Categorize a port number
pub fn port_category(port: u16) -> PortCategory {
    if port < 1024 {
        PortCategory::WellKnown
    } else if port < 49152 {
        PortCategory::Registered
    } else {
        PortCategory::Dynamic
    }
}

// ============================================================================
// SERVICE VOCABULARY
// ============================================================================

/// Service category of the one-hot block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCategory {
    Web,
    Dns,
    Messaging,
    Remote,
    FileTransfer,
    Other,
}

/// Fixed service vocabulary. Anything not listed lands in `Other`.
static SERVICE_VOCAB: Lazy<HashMap<&'static str, ServiceCategory>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for name in ["http", "https", "ssl", "tls", "web"] {
        map.insert(name, ServiceCategory::Web);
    }
    map.insert("dns", ServiceCategory::Dns);
    for name in ["mqtt", "coap", "amqp", "xmpp"] {
        map.insert(name, ServiceCategory::Messaging);
    }
    for name in ["ssh", "telnet", "rdp"] {
        map.insert(name, ServiceCategory::Remote);
    }
    for name in ["ftp", "sftp", "tftp", "ftp-data"] {
        map.insert(name, ServiceCategory::FileTransfer);
    }
    map
});

/// Categorize a service string against the fixed vocabulary
pub fn service_category(service: &str) -> ServiceCategory {
    SERVICE_VOCAB
        .get(service.trim().to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or(ServiceCategory::Other)
}

// ============================================================================
// EXTRACTION
// ============================================================================

fn log1p(value: f64) -> f32 {
    value.ln_1p() as f32
}

fn set(vector: &mut FeatureVector, name: &str, value: f32) {
    // Names come from FEATURE_LAYOUT; a miss here is a layout bug.
    if let Some(index) = feature_index(name) {
        vector.set(index, value);
    }
}

/// Extract the fixed feature vector from one normalized record.
///
/// Total for valid records: every field has a sentinel, every division is
/// floored, so the output is always finite.
pub fn extract(record: &NormalizedRecord) -> FeatureVector {
    let mut vector = FeatureVector::new();

    let orig = record.orig_bytes as f64;
    let resp = record.resp_bytes as f64;
    let packets = record.packet_count as f64;
    let duration = record.duration.max(0.0);
    let floored = duration.max(DURATION_FLOOR);

    // Rates & volumes
    set(&mut vector, "bytes_ratio", log1p(orig / resp.max(1.0)));
    set(&mut vector, "packet_rate", log1p(packets / floored));
    set(&mut vector, "byte_rate", log1p((orig + resp) / floored));
    set(&mut vector, "log_duration", log1p(duration));
    set(&mut vector, "log_orig_bytes", log1p(orig));
    set(&mut vector, "log_resp_bytes", log1p(resp));

    // Port categories
    let src_slot = match port_category(record.source_port) {
        PortCategory::WellKnown => "src_port_well_known",
        PortCategory::Registered => "src_port_registered",
        PortCategory::Dynamic => "src_port_dynamic",
    };
    set(&mut vector, src_slot, 1.0);

    let dst_slot = match port_category(record.dest_port) {
        PortCategory::WellKnown => "dst_port_well_known",
        PortCategory::Registered => "dst_port_registered",
        PortCategory::Dynamic => "dst_port_dynamic",
    };
    set(&mut vector, dst_slot, 1.0);

    // Protocol one-hot
    let proto_slot = match record.protocol {
        Protocol::Tcp => "proto_tcp",
        Protocol::Udp => "proto_udp",
        Protocol::Icmp => "proto_icmp",
        Protocol::Other => "proto_other",
    };
    set(&mut vector, proto_slot, 1.0);

    // Cyclical time encoding; zero-filled with presence flag 0 when the
    // source carried no timestamp
    if let Some(ts) = record.timestamp {
        let hour = ts.hour() as f64;
        let day = ts.weekday().num_days_from_monday() as f64;
        set(&mut vector, "hour_sin", (TAU * hour / 24.0).sin() as f32);
        set(&mut vector, "hour_cos", (TAU * hour / 24.0).cos() as f32);
        set(&mut vector, "day_sin", (TAU * day / 7.0).sin() as f32);
        set(&mut vector, "day_cos", (TAU * day / 7.0).cos() as f32);
        set(&mut vector, "time_present", 1.0);
    }

    // Service category one-hot
    let svc_slot = match service_category(&record.service) {
        ServiceCategory::Web => "svc_web",
        ServiceCategory::Dns => "svc_dns",
        ServiceCategory::Messaging => "svc_messaging",
        ServiceCategory::Remote => "svc_remote",
        ServiceCategory::FileTransfer => "svc_file_transfer",
        ServiceCategory::Other => "svc_other",
    };
    set(&mut vector, svc_slot, 1.0);

    // Connection state one-hot
    let state_slot = match record.conn_state {
        ConnState::Sf => "state_sf",
        ConnState::S0 => "state_s0",
        ConnState::Rej => "state_rej",
        ConnState::Rst => "state_rst",
        ConnState::Other => "state_other",
    };
    set(&mut vector, state_slot, 1.0);

    vector
}

/// Extract vectors for a batch, preserving input order
pub fn extract_batch(records: &[NormalizedRecord]) -> Vec<FeatureVector> {
    records.iter().map(extract).collect()
}

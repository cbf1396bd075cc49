//! Structured-document adapter (JSON).
//!
//! Accepts an array of objects or a single object, optionally rooted at
//! a configured dot path (e.g. `"data.flows"`). Nested objects are
//! flattened with dot-joined keys before field matching, so a payload
//! like `{"network": {"srcIp": ...}}` matches through `network.srcIp`.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{parse_timestamp, AdapterKind, TrafficAdapter};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::schema::{
    ConnState, IngestReport, NormalizedRecord, Protocol, TrafficLabel,
};

/// Known field spellings per standard column; nested keys use dot paths
const FIELD_VARIANTS: &[(&str, &[&str])] = &[
    (
        "timestamp",
        &["timestamp", "time", "date", "datetime", "ts", "startTime"],
    ),
    (
        "device_id",
        &["device_id", "device", "deviceId", "host", "hostId", "sourceId"],
    ),
    (
        "source_ip",
        &["source_ip", "src_ip", "srcIp", "sourceIp", "src", "source", "ipv4_src_addr"],
    ),
    (
        "dest_ip",
        &["dest_ip", "dst_ip", "dstIp", "destinationIp", "dst", "destination", "ipv4_dst_addr"],
    ),
    (
        "source_port",
        &["source_port", "src_port", "srcPort", "sourcePort", "sport", "l4_src_port"],
    ),
    (
        "dest_port",
        &["dest_port", "dst_port", "dstPort", "destinationPort", "dport", "l4_dst_port"],
    ),
    (
        "protocol",
        &["protocol", "proto", "protocolName", "l4_proto"],
    ),
    (
        "duration",
        &["duration", "dur", "flowDuration", "flow_duration", "elapsed"],
    ),
    (
        "orig_bytes",
        &["orig_bytes", "origBytes", "bytesOut", "out_bytes", "sentBytes", "bytes_sent"],
    ),
    (
        "resp_bytes",
        &["resp_bytes", "respBytes", "bytesIn", "in_bytes", "receivedBytes", "bytes_received"],
    ),
    (
        "packet_count",
        &["packet_count", "packets", "packetCount", "pkts"],
    ),
    ("service", &["service", "svc", "appProtocol"]),
    ("conn_state", &["conn_state", "connState", "state"]),
    ("label", &["label", "class", "is_anomaly"]),
];

pub struct DocumentAdapter {
    mapping: Option<HashMap<String, String>>,
    document_path: Option<String>,
}

impl DocumentAdapter {
    pub fn new(mapping: Option<HashMap<String, String>>, document_path: Option<String>) -> Self {
        Self {
            mapping,
            document_path,
        }
    }

    /// Best-effort field mapping from the first object's flattened keys
    fn detect_mapping(&self, sample: &HashMap<String, Value>) -> HashMap<&'static str, String> {
        let mut mapping = HashMap::new();

        for (std_col, variants) in FIELD_VARIANTS {
            let explicit = self.mapping.as_ref().and_then(|m| m.get(*std_col));
            if let Some(name) = explicit {
                mapping.insert(*std_col, name.clone());
                continue;
            }
            // Match the whole flattened key or its last dot segment, so
            // nested shapes like `network.srcIp` resolve through `srcIp`
            for variant in *variants {
                if let Some(key) = sample.keys().find(|k| {
                    k.eq_ignore_ascii_case(variant)
                        || k.rsplit('.')
                            .next()
                            .is_some_and(|last| last.eq_ignore_ascii_case(variant))
                }) {
                    mapping.insert(*std_col, key.clone());
                    break;
                }
            }
        }

        mapping
    }
}

impl TrafficAdapter for DocumentAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Document
    }

    fn parse(&self, path: &Path) -> CoreResult<IngestReport> {
        let text = fs::read_to_string(path)
            .map_err(|e| CoreError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|e| CoreError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;

        // Descend to the configured payload location, if any
        let mut data = &root;
        if let Some(ref dot_path) = self.document_path {
            for part in dot_path.split('.') {
                data = data.get(part).ok_or_else(|| {
                    CoreError::SourceUnreadable(format!(
                        "document path '{}' not found in {}",
                        dot_path,
                        path.display()
                    ))
                })?;
            }
        }

        let items: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![data],
            _ => {
                return Err(CoreError::SourceUnreadable(
                    "document must be an object or an array of objects".to_string(),
                ))
            }
        };

        let mut report = IngestReport::default();
        let mut mapping: Option<HashMap<&'static str, String>> = None;

        for (index, item) in items.iter().enumerate() {
            if !item.is_object() {
                report.skip(index, "not an object");
                continue;
            }

            let flat = flatten(item);
            let map = mapping.get_or_insert_with(|| {
                let detected = self.detect_mapping(&flat);
                log::info!("document field mapping: {} fields matched", detected.len());
                detected
            });

            match build_record(map, &flat) {
                Ok(record) => report.push_record(record),
                Err(reason) => report.skip(index, reason),
            }
        }

        log::info!(
            "document ingest from {}: {} parsed, {} skipped",
            path.display(),
            report.parsed_count,
            report.skipped_count
        );
        Ok(report)
    }
}

/// Flatten nested objects into dot-joined keys
fn flatten(value: &Value) -> HashMap<String, Value> {
    let mut flat = HashMap::new();
    flatten_into(value, String::new(), &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: String, out: &mut HashMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(nested, path, out);
            }
        }
        other => {
            out.insert(prefix, other.clone());
        }
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64),
        Value::String(s) => super::parse_count(s),
        _ => None,
    }
}

fn as_port(value: &Value) -> Option<u16> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => return super::parse_port(s),
        _ => return None,
    };
    if number < 0.0 || number > u16::MAX as f64 {
        return None;
    }
    Some(number as u16)
}

fn build_record(
    mapping: &HashMap<&'static str, String>,
    flat: &HashMap<String, Value>,
) -> Result<NormalizedRecord, String> {
    let get = |col: &str| -> Option<&Value> { mapping.get(col).and_then(|key| flat.get(key)) };

    let mut record = NormalizedRecord::default();
    let mut matched = 0usize;

    if let Some(value) = get("source_ip").and_then(as_string) {
        record.source_ip = value;
        matched += 1;
    }
    if let Some(value) = get("dest_ip").and_then(as_string) {
        record.dest_ip = value;
        matched += 1;
    }
    if let Some(value) = get("protocol").and_then(as_string) {
        record.protocol = Protocol::parse(&value);
        matched += 1;
    }
    if let Some(value) = get("source_port") {
        record.source_port = as_port(value).ok_or("bad source_port")?;
        matched += 1;
    }
    if let Some(value) = get("dest_port") {
        record.dest_port = as_port(value).ok_or("bad dest_port")?;
        matched += 1;
    }
    if let Some(value) = get("duration") {
        let duration = match value {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v >= 0.0),
            Value::String(s) => super::parse_duration(s),
            _ => None,
        };
        record.duration = duration.ok_or("bad duration")?;
        matched += 1;
    }
    if let Some(value) = get("orig_bytes") {
        record.orig_bytes = as_count(value).ok_or("bad orig_bytes")?;
        matched += 1;
    }
    if let Some(value) = get("resp_bytes") {
        record.resp_bytes = as_count(value).ok_or("bad resp_bytes")?;
        matched += 1;
    }
    if let Some(value) = get("packet_count") {
        record.packet_count = as_count(value).ok_or("bad packet_count")?;
        matched += 1;
    }
    if let Some(value) = get("timestamp").and_then(as_string) {
        record.timestamp = parse_timestamp(&value);
        matched += 1;
    }
    if let Some(value) = get("device_id").and_then(as_string) {
        record.device_id = value;
        matched += 1;
    } else {
        record.device_id = NormalizedRecord::device_id_from_ip(&record.source_ip);
    }
    if let Some(value) = get("service").and_then(as_string) {
        record.service = value.to_ascii_lowercase();
        matched += 1;
    }
    if let Some(value) = get("conn_state").and_then(as_string) {
        record.conn_state = ConnState::parse(&value);
        matched += 1;
    }
    if let Some(value) = get("label").and_then(as_string) {
        record.label = TrafficLabel::parse(&value);
        matched += 1;
    }

    // Best-effort matching found nothing recognizable in this object
    if matched == 0 {
        return Err("no recognizable traffic fields".to_string());
    }

    Ok(record)
}

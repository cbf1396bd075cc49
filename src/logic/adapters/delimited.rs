//! Delimited-text adapter (CSV).
//!
//! Maps source columns onto the common schema through a name-mapping
//! table. The caller can supply the table explicitly; otherwise it is
//! auto-detected from a list of known header variants. Unmapped columns
//! are ignored; a missing required column is fatal for the source.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{parse_count, parse_duration, parse_port, parse_timestamp, AdapterKind, TrafficAdapter};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::schema::{
    ConnState, IngestReport, NormalizedRecord, Protocol, TrafficLabel,
};

/// Columns that have no sensible default: a traffic record without
/// endpoints or a protocol cannot be scored meaningfully
const REQUIRED_COLUMNS: &[&str] = &["source_ip", "dest_ip", "protocol"];

/// Known header spellings per standard column, checked in order
const COLUMN_VARIANTS: &[(&str, &[&str])] = &[
    ("timestamp", &["timestamp", "time", "date", "datetime", "ts"]),
    (
        "device_id",
        &["device_id", "device", "deviceid", "host", "host_id"],
    ),
    (
        "source_ip",
        &["source_ip", "src_ip", "src", "source", "id.orig_h"],
    ),
    (
        "dest_ip",
        &["dest_ip", "dst_ip", "destination_ip", "dst", "destination", "id.resp_h"],
    ),
    (
        "source_port",
        &["source_port", "src_port", "sport", "id.orig_p"],
    ),
    (
        "dest_port",
        &["dest_port", "dst_port", "destination_port", "dport", "id.resp_p"],
    ),
    ("protocol", &["protocol", "proto", "prot", "proto_name"]),
    (
        "duration",
        &["duration", "dur", "time_delta", "elapsed"],
    ),
    (
        "orig_bytes",
        &["orig_bytes", "bytes_out", "sent_bytes", "bytes_sent"],
    ),
    (
        "resp_bytes",
        &["resp_bytes", "bytes_in", "received_bytes", "bytes_received"],
    ),
    (
        "packet_count",
        &["packet_count", "packets", "packet_size", "pkt_count"],
    ),
    ("service", &["service", "svc", "app_protocol"]),
    (
        "conn_state",
        &["conn_state", "state", "connection_state"],
    ),
    ("label", &["label", "class", "is_anomaly", "is_attack"]),
];

pub struct DelimitedAdapter {
    mapping: Option<HashMap<String, String>>,
}

impl DelimitedAdapter {
    pub fn new(mapping: Option<HashMap<String, String>>) -> Self {
        Self { mapping }
    }

    /// Resolve each standard column to a header index
    fn resolve_columns(&self, header: &[String]) -> CoreResult<HashMap<&'static str, usize>> {
        let lower: Vec<String> = header.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let mut resolved = HashMap::new();

        for (std_col, variants) in COLUMN_VARIANTS {
            // Explicit mapping wins over auto-detection
            let explicit = self
                .mapping
                .as_ref()
                .and_then(|m| m.get(*std_col))
                .map(|name| name.to_ascii_lowercase());

            let index = if let Some(name) = explicit {
                lower.iter().position(|h| *h == name)
            } else {
                variants
                    .iter()
                    .find_map(|v| lower.iter().position(|h| h == v))
            };

            if let Some(index) = index {
                resolved.insert(*std_col, index);
            }
        }

        for required in REQUIRED_COLUMNS {
            if !resolved.contains_key(required) {
                return Err(CoreError::SchemaMismatch {
                    field: required.to_string(),
                    detail: "required column not found in header and no default exists"
                        .to_string(),
                });
            }
        }

        Ok(resolved)
    }
}

impl TrafficAdapter for DelimitedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Delimited
    }

    fn parse(&self, path: &Path) -> CoreResult<IngestReport> {
        let file = File::open(path)
            .map_err(|e| CoreError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = loop {
            match lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => break line,
                Some(Err(e)) => return Err(CoreError::SourceUnreadable(e.to_string())),
                None => {
                    return Err(CoreError::SourceUnreadable(format!(
                        "{}: empty file, no header row",
                        path.display()
                    )))
                }
            }
        };

        let header = split_line(&header_line, ',');
        let columns = self.resolve_columns(&header)?;
        let mut report = IngestReport::default();

        for (row, line) in lines.enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    report.skip(row, format!("unreadable line: {}", e));
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_line(&line, ',');
            if fields.len() != header.len() {
                report.skip(
                    row,
                    format!("expected {} fields, found {}", header.len(), fields.len()),
                );
                continue;
            }

            match build_record(&columns, &fields) {
                Ok(record) => report.push_record(record),
                Err(reason) => report.skip(row, reason),
            }
        }

        log::info!(
            "delimited ingest from {}: {} parsed, {} skipped",
            path.display(),
            report.parsed_count,
            report.skipped_count
        );
        Ok(report)
    }
}

fn build_record(
    columns: &HashMap<&'static str, usize>,
    fields: &[String],
) -> Result<NormalizedRecord, String> {
    let get = |col: &str| -> Option<&str> {
        columns
            .get(col)
            .and_then(|&i| fields.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    };

    let mut record = NormalizedRecord::default();

    // Required columns are guaranteed mapped; an empty cell still skips
    record.source_ip = get("source_ip")
        .ok_or("missing source_ip value")?
        .to_string();
    record.dest_ip = get("dest_ip").ok_or("missing dest_ip value")?.to_string();
    record.protocol = Protocol::parse(get("protocol").ok_or("missing protocol value")?);

    if let Some(value) = get("source_port") {
        record.source_port = parse_port(value).ok_or_else(|| format!("bad source_port '{}'", value))?;
    }
    if let Some(value) = get("dest_port") {
        record.dest_port = parse_port(value).ok_or_else(|| format!("bad dest_port '{}'", value))?;
    }
    if let Some(value) = get("duration") {
        record.duration = parse_duration(value).ok_or_else(|| format!("bad duration '{}'", value))?;
    }
    if let Some(value) = get("orig_bytes") {
        record.orig_bytes = parse_count(value).ok_or_else(|| format!("bad orig_bytes '{}'", value))?;
    }
    if let Some(value) = get("resp_bytes") {
        record.resp_bytes = parse_count(value).ok_or_else(|| format!("bad resp_bytes '{}'", value))?;
    }
    if let Some(value) = get("packet_count") {
        record.packet_count =
            parse_count(value).ok_or_else(|| format!("bad packet_count '{}'", value))?;
    }

    record.timestamp = get("timestamp").and_then(parse_timestamp);
    record.device_id = match get("device_id") {
        Some(value) => value.to_string(),
        None => NormalizedRecord::device_id_from_ip(&record.source_ip),
    };
    if let Some(value) = get("service") {
        record.service = value.to_ascii_lowercase();
    }
    if let Some(value) = get("conn_state") {
        record.conn_state = ConnState::parse(value);
    }
    if let Some(value) = get("label") {
        record.label = TrafficLabel::parse(value);
    }

    Ok(record)
}

/// Split one delimited line, honoring double-quoted fields with `""`
/// escapes
pub(crate) fn split_line(line: &str, delim: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delim {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

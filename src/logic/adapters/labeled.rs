//! Labeled-dataset adapter.
//!
//! Parses the reference intrusion dataset's fixed Zeek-style conn.log
//! layout (tab-separated, 23 columns) and preserves the ground-truth
//! label so training/validation workflows can calibrate contamination
//! against it. `#` header lines are skipped; `-` marks a missing value.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{parse_count, parse_duration, parse_port, parse_timestamp, AdapterKind, TrafficAdapter};
use crate::logic::error::{CoreError, CoreResult};
use crate::logic::schema::{
    ConnState, IngestReport, NormalizedRecord, Protocol, TrafficLabel,
};

/// Fixed column layout of the dataset
const COLUMNS: &[&str] = &[
    "ts",
    "uid",
    "id.orig_h",
    "id.orig_p",
    "id.resp_h",
    "id.resp_p",
    "proto",
    "service",
    "duration",
    "orig_bytes",
    "resp_bytes",
    "conn_state",
    "local_orig",
    "local_resp",
    "missed_bytes",
    "history",
    "orig_pkts",
    "orig_ip_bytes",
    "resp_pkts",
    "resp_ip_bytes",
    "tunnel_parents",
    "label",
    "detailed_label",
];

/// Columns required for a usable record (through conn_state)
const MIN_COLUMNS: usize = 12;

const COL_TS: usize = 0;
const COL_ORIG_H: usize = 2;
const COL_ORIG_P: usize = 3;
const COL_RESP_H: usize = 4;
const COL_RESP_P: usize = 5;
const COL_PROTO: usize = 6;
const COL_SERVICE: usize = 7;
const COL_DURATION: usize = 8;
const COL_ORIG_BYTES: usize = 9;
const COL_RESP_BYTES: usize = 10;
const COL_CONN_STATE: usize = 11;
const COL_ORIG_PKTS: usize = 16;
const COL_RESP_PKTS: usize = 18;
const COL_LABEL: usize = 21;

pub struct LabeledAdapter;

impl LabeledAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LabeledAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficAdapter for LabeledAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Labeled
    }

    fn parse(&self, path: &Path) -> CoreResult<IngestReport> {
        let file = File::open(path)
            .map_err(|e| CoreError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let reader = BufReader::new(file);
        let mut report = IngestReport::default();

        for (row, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    report.skip(row, format!("unreadable line: {}", e));
                    continue;
                }
            };
            let trimmed = line.trim_end();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < MIN_COLUMNS {
                report.skip(
                    row,
                    format!(
                        "expected at least {} of {} columns, found {}",
                        MIN_COLUMNS,
                        COLUMNS.len(),
                        fields.len()
                    ),
                );
                continue;
            }

            match build_record(&fields) {
                Ok(record) => report.push_record(record),
                Err(reason) => report.skip(row, reason),
            }
        }

        log::info!(
            "labeled ingest from {}: {} parsed, {} skipped",
            path.display(),
            report.parsed_count,
            report.skipped_count
        );
        Ok(report)
    }
}

fn build_record(fields: &[&str]) -> Result<NormalizedRecord, String> {
    let field = |i: usize| -> &str { fields.get(i).copied().unwrap_or("-").trim() };

    let source_ip = field(COL_ORIG_H).to_string();
    let source_port =
        parse_port(field(COL_ORIG_P)).ok_or_else(|| format!("bad orig_p '{}'", field(COL_ORIG_P)))?;
    let dest_port =
        parse_port(field(COL_RESP_P)).ok_or_else(|| format!("bad resp_p '{}'", field(COL_RESP_P)))?;
    let duration = parse_duration(field(COL_DURATION))
        .ok_or_else(|| format!("bad duration '{}'", field(COL_DURATION)))?;
    let orig_bytes = parse_count(field(COL_ORIG_BYTES))
        .ok_or_else(|| format!("bad orig_bytes '{}'", field(COL_ORIG_BYTES)))?;
    let resp_bytes = parse_count(field(COL_RESP_BYTES))
        .ok_or_else(|| format!("bad resp_bytes '{}'", field(COL_RESP_BYTES)))?;
    let orig_pkts = parse_count(field(COL_ORIG_PKTS))
        .ok_or_else(|| format!("bad orig_pkts '{}'", field(COL_ORIG_PKTS)))?;
    let resp_pkts = parse_count(field(COL_RESP_PKTS))
        .ok_or_else(|| format!("bad resp_pkts '{}'", field(COL_RESP_PKTS)))?;

    let service = match field(COL_SERVICE) {
        "-" | "" => "unknown".to_string(),
        value => value.to_ascii_lowercase(),
    };

    Ok(NormalizedRecord {
        device_id: NormalizedRecord::device_id_from_ip(&source_ip),
        timestamp: parse_timestamp(field(COL_TS)),
        source_ip,
        dest_ip: field(COL_RESP_H).to_string(),
        source_port,
        dest_port,
        protocol: Protocol::parse(field(COL_PROTO)),
        service,
        duration,
        orig_bytes,
        resp_bytes,
        packet_count: orig_pkts + resp_pkts,
        conn_state: ConnState::parse(field(COL_CONN_STATE)),
        label: TrafficLabel::parse(field(COL_LABEL)),
    })
}

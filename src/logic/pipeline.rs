//! Ingestion/extraction facade.
//!
//! The thin surface collaborators (API layer, CLI tools) call into:
//! pick an adapter, normalize a source, derive feature vectors. Training
//! and scoring live on [`DetectionEngine`](crate::logic::engine::DetectionEngine).

use std::path::Path;

use crate::logic::adapters::{select_adapter, AdapterKind, AdapterOptions};
use crate::logic::error::CoreResult;
use crate::logic::features::{extract_batch, FeatureVector};
use crate::logic::schema::{IngestReport, NormalizedRecord};

/// Normalize a source file into the common schema.
///
/// `hint` overrides extension sniffing ("csv", "json", "pcap",
/// "iot23"). Per-record problems are counted in the report; only
/// container-level failures return an error.
pub fn ingest(
    path: &Path,
    hint: Option<AdapterKind>,
    options: &AdapterOptions,
) -> CoreResult<IngestReport> {
    let adapter = select_adapter(path, hint, options)?;
    let report = adapter.parse(path)?;

    log::info!(
        "ingest {}: {} records, {} skipped ({} adapter)",
        path.display(),
        report.parsed_count,
        report.skipped_count,
        adapter.kind().as_str()
    );
    Ok(report)
}

/// Derive feature vectors for a batch of normalized records,
/// preserving order
pub fn extract_features(records: &[NormalizedRecord]) -> Vec<FeatureVector> {
    extract_batch(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ingest_to_features_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "src_ip,dst_ip,proto,src_port,dst_port,duration,bytes_out,bytes_in,service"
        )
        .unwrap();
        writeln!(file, "192.168.1.4,10.0.0.1,tcp,50000,80,2.0,800,3200,http").unwrap();
        writeln!(file, "192.168.1.4,10.0.0.1,udp,51000,53,0.1,60,120,dns").unwrap();

        let report = ingest(&path, None, &AdapterOptions::default()).unwrap();
        assert_eq!(report.parsed_count, 2);

        let vectors = extract_features(&report.records);
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.is_finite()));
        // Records without a timestamp column still produce full vectors
        assert_eq!(vectors[0].get_by_name("time_present"), Some(0.0));
    }
}

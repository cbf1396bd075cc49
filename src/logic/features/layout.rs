//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema**
//!
//! ## Rules (NEVER break these):
//! 1. Add feature → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove feature → increment FEATURE_VERSION
//!
//! Stored model bundles are keyed by this version and refuse to score
//! vectors built under a different layout.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
/// MUST be incremented when layout changes
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT (Authoritative source)
// ============================================================================

/// Feature names in exact order they appear in the vector
/// This is the SINGLE SOURCE OF TRUTH for feature layout
pub const FEATURE_LAYOUT: &[&str] = &[
    // === Rates & volumes (0-5) ===
    "bytes_ratio",    // 0: log1p(orig_bytes / max(resp_bytes, 1))
    "packet_rate",    // 1: log1p(packet_count / duration), floored duration
    "byte_rate",      // 2: log1p(total bytes / duration), floored duration
    "log_duration",   // 3: log1p(duration seconds)
    "log_orig_bytes", // 4
    "log_resp_bytes", // 5

    // === Source port category (6-8) ===
    "src_port_well_known", // 6: < 1024
    "src_port_registered", // 7: 1024-49151
    "src_port_dynamic",    // 8: >= 49152

    // === Destination port category (9-11) ===
    "dst_port_well_known", // 9
    "dst_port_registered", // 10
    "dst_port_dynamic",    // 11

    // === Protocol (12-15) ===
    "proto_tcp",   // 12
    "proto_udp",   // 13
    "proto_icmp",  // 14
    "proto_other", // 15

    // === Cyclical time (16-20) ===
    "hour_sin",     // 16
    "hour_cos",     // 17
    "day_sin",      // 18
    "day_cos",      // 19
    "time_present", // 20: 1 when the record carried a timestamp

    // === Service category (21-26) ===
    "svc_web",           // 21: http/https/ssl/tls
    "svc_dns",           // 22
    "svc_messaging",     // 23: mqtt/coap/amqp/xmpp
    "svc_remote",        // 24: ssh/telnet/rdp
    "svc_file_transfer", // 25: ftp/sftp/tftp
    "svc_other",         // 26

    // === Connection state (27-31) ===
    "state_sf",    // 27
    "state_s0",    // 28
    "state_rej",   // 29
    "state_rst",   // 30
    "state_other", // 31
];

/// Total number of features
/// IMPORTANT: Must match FEATURE_LAYOUT.len()!
/// Capped at 32 so the vector stays a serde-friendly fixed array.
pub const FEATURE_COUNT: usize = 32;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// Compute CRC32 hash of the feature layout
/// Used to detect layout mismatches at runtime
pub fn compute_layout_hash() -> u32 {
    let mut hasher = Hasher::new();

    // Include version in hash
    hasher.update(&[FEATURE_VERSION]);

    // Hash all feature names in order
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

/// Get layout hash
pub fn layout_hash() -> u32 {
    compute_layout_hash()
}

// ============================================================================
// LAYOUT INFO
// ============================================================================

/// Complete layout information for serialization/logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            feature_count: FEATURE_COUNT,
            feature_names: FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for LayoutInfo {
    fn default() -> Self {
        Self::current()
    }
}

// ============================================================================
// LAYOUT VALIDATION
// ============================================================================

/// Error when feature layout doesn't match expected
#[derive(Debug, Clone)]
pub struct LayoutMismatchError {
    pub expected_version: u8,
    pub expected_hash: u32,
    pub actual_version: u8,
    pub actual_hash: u32,
}

impl std::fmt::Display for LayoutMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature layout mismatch: expected v{} (hash: {:08x}), got v{} (hash: {:08x})",
            self.expected_version, self.expected_hash, self.actual_version, self.actual_hash
        )
    }
}

impl std::error::Error for LayoutMismatchError {}

/// Validate that incoming data matches current layout
pub fn validate_layout(
    incoming_version: u8,
    incoming_hash: u32,
) -> Result<(), LayoutMismatchError> {
    let current_hash = layout_hash();

    if incoming_version != FEATURE_VERSION || incoming_hash != current_hash {
        return Err(LayoutMismatchError {
            expected_version: FEATURE_VERSION,
            expected_hash: current_hash,
            actual_version: incoming_version,
            actual_hash: incoming_hash,
        });
    }

    Ok(())
}

// ============================================================================
// FEATURE INDEX LOOKUP
// ============================================================================

/// Get feature index by name (O(n) but features are few)
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

/// Get feature name by index
pub fn feature_name(index: usize) -> Option<&'static str> {
    FEATURE_LAYOUT.get(index).copied()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_COUNT, 32);
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_layout_hash_consistency() {
        let hash1 = compute_layout_hash();
        let hash2 = compute_layout_hash();
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, 0);
    }

    #[test]
    fn test_validate_layout() {
        assert!(validate_layout(FEATURE_VERSION, layout_hash()).is_ok());
        assert!(validate_layout(FEATURE_VERSION + 1, layout_hash()).is_err());
        assert!(validate_layout(FEATURE_VERSION, layout_hash().wrapping_add(1)).is_err());
    }

    #[test]
    fn test_feature_index() {
        assert_eq!(feature_index("bytes_ratio"), Some(0));
        assert_eq!(feature_index("proto_tcp"), Some(12));
        assert_eq!(feature_index("state_other"), Some(31));
        assert_eq!(feature_index("nonexistent"), None);
    }

    #[test]
    fn test_feature_name() {
        assert_eq!(feature_name(0), Some("bytes_ratio"));
        assert_eq!(feature_name(31), Some("state_other"));
        assert_eq!(feature_name(100), None);
    }
}

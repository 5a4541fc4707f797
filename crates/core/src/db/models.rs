use serde::{Deserialize, Serialize};

use crate::scanner::ScanResult;

/// A binary known to the project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryRecord {
    /// Human-friendly name (e.g., "Game.exe (build 1482)").
    pub name: String,
    /// Path to the binary, relative to the project root if possible.
    pub path: String,
    /// Optional architecture string (e.g., "x86_64").
    pub arch: Option<String>,
    /// SHA-256 of the file contents.
    pub hash: Option<String>,
}

impl BinaryRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self { name: name.into(), path: path.into(), arch: None, hash: None }
    }
}

/// Summary row of one scan, for history listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRunRecord {
    pub binary: String,
    pub binary_hash: String,
    pub signatures_total: i64,
    pub matched: i64,
    pub missing: i64,
    pub changes: i64,
    pub patterns: i64,
    pub scanned_at: String,
}

impl ScanRunRecord {
    pub fn from_scan(binary: impl Into<String>, result: &ScanResult) -> Self {
        Self {
            binary: binary.into(),
            binary_hash: result.binary_hash.clone(),
            signatures_total: result.signatures_total as i64,
            matched: result.signatures_matched as i64,
            missing: result.signatures_missing as i64,
            changes: result.changes.len() as i64,
            patterns: result.pattern_groups.len() as i64,
            scanned_at: result.scanned_at.clone(),
        }
    }
}

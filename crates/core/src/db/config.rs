use serde::{Deserialize, Serialize};

use crate::scanner::ExtractOptions;

/// Database location, relative to the project root unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Project-wide defaults for extraction; CLI flags override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub min_confidence: u8,
    pub max_occurrences: usize,
    pub context_bytes: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let defaults = ExtractOptions::default();
        Self {
            min_confidence: defaults.min_confidence,
            max_occurrences: defaults.max_occurrences,
            context_bytes: defaults.context_bytes,
        }
    }
}

impl ScanSettings {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            min_confidence: self.min_confidence,
            max_occurrences: self.max_occurrences,
            context_bytes: self.context_bytes,
            ..ExtractOptions::default()
        }
    }
}

/// Serializable configuration describing a drift-tracking project.
///
/// Lives at `.drift/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    pub description: Option<String>,
    /// Version of the config format, not of any binary.
    pub config_version: String,
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanSettings,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            scan: ScanSettings::default(),
        }
    }
}

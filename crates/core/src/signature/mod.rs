//! Signature kinds, records, and confidence scoring.
//!
//! Two scoring formulas exist and are kept apart on purpose:
//!
//! - [`extraction_confidence`] rates a freshly synthesized signature against
//!   the binary it was extracted from. A unique hit earns a +10 bonus.
//! - [`confidence`] rates a signature matched against a (possibly rebuilt)
//!   binary during a scan: every extra occurrence costs 10 points (max 30),
//!   agreeing context adds 5.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::index::InstructionKind;

/// Field-name placeholder for RTTI/vtable-level signatures.
pub const VTABLE_FIELD: &str = "__vftable";

/// Current on-disk format of [`StructSignatures`].
pub const SIGNATURE_FORMAT_VERSION: u32 = 1;

/// Bonus applied at extraction time when a pattern occurs exactly once.
pub const UNIQUENESS_BONUS: i32 = 10;
/// Points lost per extra occurrence beyond the first.
pub const OCCURRENCE_PENALTY: i32 = 10;
pub const MAX_OCCURRENCE_PENALTY: i32 = 30;
/// Bonus when surrounding context bytes also matched.
pub const CONTEXT_BONUS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    Rtti,
    VtableRef,
    FieldAccess,
    FunctionPrologue,
    StringRef,
}

impl SignatureKind {
    /// Fixed trust table: RTTI strings and vtable references are the most unique.
    pub fn base_weight(&self) -> u8 {
        match self {
            SignatureKind::Rtti => 99,
            SignatureKind::VtableRef => 95,
            SignatureKind::FieldAccess => 85,
            SignatureKind::FunctionPrologue => 80,
            SignatureKind::StringRef => 70,
        }
    }

    /// Code kinds are searched in executable sections only; string kinds
    /// anywhere in the file.
    pub fn is_code(&self) -> bool {
        !matches!(self, SignatureKind::Rtti | SignatureKind::StringRef)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::Rtti => "rtti",
            SignatureKind::VtableRef => "vtable_ref",
            SignatureKind::FieldAccess => "field_access",
            SignatureKind::FunctionPrologue => "function_prologue",
            SignatureKind::StringRef => "string_ref",
        }
    }
}

fn clamp_score(value: i32) -> u8 {
    value.clamp(0, 100) as u8
}

/// Scan-time confidence for a signature seen `occurrences` times.
pub fn confidence(kind: SignatureKind, occurrences: usize, context_matched: bool) -> u8 {
    let extra = occurrences.saturating_sub(1).min(i32::MAX as usize) as i32;
    let penalty = extra.saturating_mul(OCCURRENCE_PENALTY).min(MAX_OCCURRENCE_PENALTY);
    let bonus = if context_matched { CONTEXT_BONUS } else { 0 };
    clamp_score(i32::from(kind.base_weight()) - penalty + bonus)
}

/// Extraction-time confidence for a pattern with `occurrences` candidate sites.
pub fn extraction_confidence(kind: SignatureKind, occurrences: usize) -> u8 {
    let base = i32::from(kind.base_weight());
    if occurrences == 1 {
        return clamp_score(base + UNIQUENESS_BONUS);
    }
    let extra = occurrences.saturating_sub(1).min(i32::MAX as usize) as i32;
    clamp_score(base - extra.saturating_mul(OCCURRENCE_PENALTY).min(MAX_OCCURRENCE_PENALTY))
}

/// A byte-pattern locator for one struct field (or vtable anchor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub struct_name: String,
    pub field_name: String,
    pub expected_offset: u64,
    /// Wildcard pattern; for field accesses the displacement is the first
    /// wildcard run.
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    /// Confidence assigned at extraction (0-100).
    pub base_confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<InstructionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Signature {
    pub fn is_vtable_anchor(&self) -> bool {
        self.field_name == VTABLE_FIELD
    }
}

/// All signatures extracted for one struct from one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructSignatures {
    pub struct_name: String,
    pub binary_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_version: Option<String>,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub extracted_at: String,
    pub signatures: Vec<Signature>,
}

fn default_format_version() -> u32 {
    SIGNATURE_FORMAT_VERSION
}

impl StructSignatures {
    /// Identity of a signature collection.
    pub fn identity(&self) -> (&str, &str) {
        (&self.struct_name, &self.binary_hash)
    }
}

/// On-disk shape: either one struct's collection or a combined array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignatureFile {
    Many(Vec<StructSignatures>),
    One(StructSignatures),
}

impl SignatureFile {
    pub fn into_vec(self) -> Vec<StructSignatures> {
        match self {
            SignatureFile::Many(sets) => sets,
            SignatureFile::One(set) => vec![set],
        }
    }
}

/// Load one or many signature collections from a JSON file.
pub fn load_signatures<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<StructSignatures>> {
    let content = fs::read_to_string(&path)?;
    let file: SignatureFile = serde_json::from_str(&content)?;
    Ok(file.into_vec())
}

/// Write signature collections as one combined JSON array.
pub fn save_signatures<P: AsRef<Path>>(path: P, sets: &[StructSignatures]) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(sets)?;
    fs::write(path, content)?;
    Ok(())
}

/// Result of matching one signature against a binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMatch {
    pub struct_name: String,
    pub field_name: String,
    pub kind: SignatureKind,
    pub expected_offset: u64,
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_offset: Option<u64>,
    pub confidence: u8,
    pub occurrence_count: usize,
    pub context_matched: bool,
}

impl SignatureMatch {
    pub fn missing(signature: &Signature) -> Self {
        Self {
            struct_name: signature.struct_name.clone(),
            field_name: signature.field_name.clone(),
            kind: signature.kind,
            expected_offset: signature.expected_offset,
            found: false,
            file_offset: None,
            observed_offset: None,
            confidence: 0,
            occurrence_count: 0,
            context_matched: false,
        }
    }

    /// Found, with an observed offset that differs from the expected one.
    pub fn is_changed(&self) -> bool {
        self.found && self.observed_offset.is_some_and(|o| o != self.expected_offset)
    }
}

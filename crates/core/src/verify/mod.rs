//! Cross-verification of declared layouts against binary evidence.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::{format_delta, majority_shift, offset_delta, DeltaSample};
use crate::model::LayoutSnapshot;
use crate::scanner::ScanResult;
use crate::signature::{StructSignatures, VTABLE_FIELD};

/// Mismatches at or above this confidence become patch suggestions.
pub const PATCH_CONFIDENCE_THRESHOLD: u8 = 70;
/// Deltas larger than this are structural, not noise.
pub const SEVERE_DELTA: u64 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    OffsetMismatch,
    StructNotFound,
    MissingField,
    UncoveredField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub struct_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    pub message: String,
}

/// One piece of binary evidence: "field X sits at offset Y".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub struct_name: String,
    pub field_name: String,
    pub observed_offset: u64,
    pub confidence: u8,
}

impl Observation {
    /// Offsets seen at extraction time.
    pub fn from_signatures(sets: &[StructSignatures]) -> Vec<Self> {
        sets.iter()
            .flat_map(|set| &set.signatures)
            .map(|s| Self {
                struct_name: s.struct_name.clone(),
                field_name: s.field_name.clone(),
                observed_offset: s.expected_offset,
                confidence: s.base_confidence,
            })
            .collect()
    }

    /// Offsets seen in a scanned binary; missing signatures yield nothing.
    pub fn from_scan(result: &ScanResult) -> Vec<Self> {
        result
            .matches
            .iter()
            .filter(|m| m.found)
            .filter_map(|m| {
                Some(Self {
                    struct_name: m.struct_name.clone(),
                    field_name: m.field_name.clone(),
                    observed_offset: m.observed_offset?,
                    confidence: m.confidence,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSuggestion {
    pub struct_name: String,
    pub field_name: String,
    pub current_offset: u64,
    pub suggested_offset: u64,
    pub delta: i64,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkShiftSuggestion {
    pub hierarchy: String,
    pub label: String,
    pub delta: i64,
    pub affected_fields: Vec<String>,
    pub match_count: usize,
    pub total_candidates: usize,
    pub confidence: f64,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub declared_fields: usize,
    pub observed_fields: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub layout_version: String,
    /// Observations examined.
    pub checked: usize,
    /// Observations that agreed with the declared offset.
    pub matched: usize,
    pub issues: Vec<VerificationIssue>,
    pub patch_suggestions: Vec<PatchSuggestion>,
    /// Low-confidence mismatches; never applied automatically.
    pub manual_review: Vec<PatchSuggestion>,
    pub bulk_shifts: Vec<BulkShiftSuggestion>,
    pub coverage: Coverage,
}

impl VerificationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }
}

fn mismatch_severity(delta: i64) -> Severity {
    if delta.unsigned_abs() > SEVERE_DELTA {
        Severity::Error
    } else {
        Severity::Warning
    }
}

/// Check every observation against `layout`.
pub fn verify(layout: &LayoutSnapshot, observations: &[Observation]) -> VerificationReport {
    let mut issues = Vec::new();
    let mut patch_suggestions = Vec::new();
    let mut manual_review = Vec::new();
    let mut matched = 0;
    let mut covered: BTreeSet<(String, String)> = BTreeSet::new();
    let mut shifts: BTreeMap<String, Vec<DeltaSample>> = BTreeMap::new();
    let mut unknown_structs: BTreeSet<&str> = BTreeSet::new();

    for obs in observations {
        let Some(def) = layout.struct_by_name(&obs.struct_name) else {
            if unknown_structs.insert(&obs.struct_name) {
                issues.push(VerificationIssue {
                    kind: IssueKind::StructNotFound,
                    severity: Severity::Error,
                    struct_name: obs.struct_name.clone(),
                    field_name: None,
                    declared_offset: None,
                    observed_offset: None,
                    delta: None,
                    confidence: None,
                    message: format!("struct {} is not declared in the layout", obs.struct_name),
                });
            }
            continue;
        };
        if obs.field_name == VTABLE_FIELD {
            matched += 1;
            continue;
        }
        let Some(field) = def.field_by_key(&obs.field_name) else {
            issues.push(VerificationIssue {
                kind: IssueKind::MissingField,
                severity: Severity::Warning,
                struct_name: obs.struct_name.clone(),
                field_name: Some(obs.field_name.clone()),
                declared_offset: None,
                observed_offset: Some(obs.observed_offset),
                delta: None,
                confidence: Some(obs.confidence),
                message: format!("{}::{} is not declared in the layout", obs.struct_name, obs.field_name),
            });
            continue;
        };

        covered.insert((obs.struct_name.clone(), obs.field_name.clone()));
        if field.offset == obs.observed_offset {
            matched += 1;
            continue;
        }

        let delta = offset_delta(field.offset, obs.observed_offset);
        issues.push(VerificationIssue {
            kind: IssueKind::OffsetMismatch,
            severity: mismatch_severity(delta),
            struct_name: obs.struct_name.clone(),
            field_name: Some(obs.field_name.clone()),
            declared_offset: Some(field.offset),
            observed_offset: Some(obs.observed_offset),
            delta: Some(delta),
            confidence: Some(obs.confidence),
            message: format!(
                "{}::{} declared at {:#x} but observed at {:#x} ({})",
                obs.struct_name,
                obs.field_name,
                field.offset,
                obs.observed_offset,
                format_delta(delta)
            ),
        });

        let suggestion = PatchSuggestion {
            struct_name: obs.struct_name.clone(),
            field_name: obs.field_name.clone(),
            current_offset: field.offset,
            suggested_offset: obs.observed_offset,
            delta,
            confidence: obs.confidence,
        };
        if obs.confidence >= PATCH_CONFIDENCE_THRESHOLD {
            patch_suggestions.push(suggestion);
        } else {
            manual_review.push(suggestion);
        }

        shifts.entry(layout.hierarchy_root(&obs.struct_name)).or_default().push(DeltaSample::from_offsets(
            &obs.struct_name,
            &obs.field_name,
            field.offset,
            obs.observed_offset,
        ));
    }

    let declared = layout.declared_fields();
    for field in &declared {
        if !covered.contains(&(field.struct_name.clone(), field.field_name.clone())) {
            issues.push(VerificationIssue {
                kind: IssueKind::UncoveredField,
                severity: Severity::Info,
                struct_name: field.struct_name.clone(),
                field_name: Some(field.field_name.clone()),
                declared_offset: Some(field.offset),
                observed_offset: None,
                delta: None,
                confidence: None,
                message: format!("{}::{} has no binary evidence", field.struct_name, field.field_name),
            });
        }
    }

    let bulk_shifts: Vec<BulkShiftSuggestion> = shifts
        .iter()
        .filter_map(|(root, samples)| {
            let cluster = majority_shift(samples)?;
            Some(BulkShiftSuggestion {
                hierarchy: root.clone(),
                label: format!("{root}: shift {}", format_delta(cluster.delta)),
                delta: cluster.delta,
                affected_fields: cluster.affected_members(),
                match_count: cluster.match_count(),
                total_candidates: cluster.total_candidates,
                confidence: cluster.confidence,
                anomalies: cluster.anomalies.iter().map(DeltaSample::qualified).collect(),
            })
        })
        .collect();

    let observed_fields = declared
        .iter()
        .filter(|f| covered.contains(&(f.struct_name.clone(), f.field_name.clone())))
        .count();
    let coverage = Coverage {
        declared_fields: declared.len(),
        observed_fields,
        ratio: if declared.is_empty() { 0.0 } else { observed_fields as f64 / declared.len() as f64 },
    };

    let report = VerificationReport {
        layout_version: layout.version.clone(),
        checked: observations.len(),
        matched,
        issues,
        patch_suggestions,
        manual_review,
        bulk_shifts,
        coverage,
    };
    info!(
        checked = report.checked,
        matched = report.matched,
        errors = report.count(Severity::Error),
        warnings = report.count(Severity::Warning),
        "verification finished"
    );
    report
}

//! Symbolic drift detection between two layout snapshots.
//!
//! Structs are matched by name, fields by [`FieldDef::key`], vtable slots and
//! member functions by name. Offset deltas of every field present in both
//! versions (and slot deltas of every surviving virtual function) are then
//! grouped per inheritance hierarchy and reduced to at most one shift
//! hypothesis per hierarchy and member kind. Unmoved members count towards a
//! hypothesis' total but never as anomalies.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{format_delta, majority_shift, offset_delta, DeltaSample};
use crate::model::{FieldDef, FunctionDef, LayoutSnapshot, StructDef, VirtualFunctionDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::Added => "added",
            DiffStatus::Removed => "removed",
            DiffStatus::Modified => "modified",
            DiffStatus::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub name: String,
    pub status: DiffStatus,
    pub old_offset: Option<u64>,
    pub new_offset: Option<u64>,
    /// `new - old`, present only when the field exists on both sides.
    pub delta: Option<i64>,
    pub old_type: Option<String>,
    pub new_type: Option<String>,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
}

impl FieldDiff {
    pub fn moved(&self) -> bool {
        self.delta.is_some_and(|d| d != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtableSlotDiff {
    pub name: String,
    pub status: DiffStatus,
    pub old_slot: Option<u32>,
    pub new_slot: Option<u32>,
    pub delta: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDiff {
    pub name: String,
    pub status: DiffStatus,
    pub old_address: Option<u64>,
    pub new_address: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDiff {
    pub name: String,
    pub status: DiffStatus,
    pub old_size: Option<u64>,
    pub new_size: Option<u64>,
    pub old_base: Option<String>,
    pub new_base: Option<String>,
    /// Member-level detail, recorded for modified structs only.
    pub fields: Vec<FieldDiff>,
    pub vfuncs: Vec<VtableSlotDiff>,
    pub functions: Vec<FunctionDiff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Field,
    VtableSlot,
}

/// A proposed bulk shift for one hierarchy, consumed by patch builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyDeltaCandidate {
    /// Root struct of the inheritance chain.
    pub hierarchy: String,
    pub kind: CandidateKind,
    pub label: String,
    pub delta: i64,
    pub affected_structs: Vec<String>,
    pub affected_members: Vec<String>,
    pub match_count: usize,
    pub total_candidates: usize,
    pub confidence: f64,
    pub anomalies: Vec<DeltaSample>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub old_version: String,
    pub new_version: String,
    pub struct_diffs: Vec<StructDiff>,
    pub candidates: Vec<HierarchyDeltaCandidate>,
}

impl DriftReport {
    pub fn count(&self, status: DiffStatus) -> usize {
        self.struct_diffs.iter().filter(|d| d.status == status).count()
    }

    /// Fields whose offset moved, across all structs.
    pub fn moved_fields(&self) -> impl Iterator<Item = (&str, &FieldDiff)> {
        self.struct_diffs
            .iter()
            .flat_map(|s| s.fields.iter().map(move |f| (s.name.as_str(), f)))
            .filter(|(_, f)| f.moved())
    }

    /// Candidates at or above `min_confidence` that are still enabled.
    pub fn actionable(&self, min_confidence: f64) -> impl Iterator<Item = &HierarchyDeltaCandidate> {
        self.candidates.iter().filter(move |c| c.enabled && c.confidence >= min_confidence)
    }
}

fn diff_fields(old: &[FieldDef], new: &[FieldDef]) -> Vec<FieldDiff> {
    let new_by_key: HashMap<String, &FieldDef> = new.iter().map(|f| (f.key(), f)).collect();
    let mut out = Vec::new();

    for before in old {
        let key = before.key();
        let diff = match new_by_key.get(&key) {
            Some(after) => {
                let same = before.offset == after.offset
                    && before.type_name == after.type_name
                    && before.size == after.size;
                FieldDiff {
                    name: key,
                    status: if same { DiffStatus::Unchanged } else { DiffStatus::Modified },
                    old_offset: Some(before.offset),
                    new_offset: Some(after.offset),
                    delta: Some(offset_delta(before.offset, after.offset)),
                    old_type: before.type_name.clone(),
                    new_type: after.type_name.clone(),
                    old_size: before.size,
                    new_size: after.size,
                }
            }
            None => FieldDiff {
                name: key,
                status: DiffStatus::Removed,
                old_offset: Some(before.offset),
                new_offset: None,
                delta: None,
                old_type: before.type_name.clone(),
                new_type: None,
                old_size: before.size,
                new_size: None,
            },
        };
        out.push(diff);
    }

    let old_keys: Vec<String> = old.iter().map(FieldDef::key).collect();
    for after in new.iter().filter(|f| !old_keys.contains(&f.key())) {
        out.push(FieldDiff {
            name: after.key(),
            status: DiffStatus::Added,
            old_offset: None,
            new_offset: Some(after.offset),
            delta: None,
            old_type: None,
            new_type: after.type_name.clone(),
            old_size: None,
            new_size: after.size,
        });
    }
    out
}

fn diff_vfuncs(old: &[VirtualFunctionDef], new: &[VirtualFunctionDef]) -> Vec<VtableSlotDiff> {
    let mut out: Vec<VtableSlotDiff> = old
        .iter()
        .map(|before| match new.iter().find(|v| v.name == before.name) {
            Some(after) => VtableSlotDiff {
                name: before.name.clone(),
                status: if before.slot == after.slot { DiffStatus::Unchanged } else { DiffStatus::Modified },
                old_slot: Some(before.slot),
                new_slot: Some(after.slot),
                delta: Some(i64::from(after.slot) - i64::from(before.slot)),
            },
            None => VtableSlotDiff {
                name: before.name.clone(),
                status: DiffStatus::Removed,
                old_slot: Some(before.slot),
                new_slot: None,
                delta: None,
            },
        })
        .collect();
    for after in new.iter().filter(|v| !old.iter().any(|o| o.name == v.name)) {
        out.push(VtableSlotDiff {
            name: after.name.clone(),
            status: DiffStatus::Added,
            old_slot: None,
            new_slot: Some(after.slot),
            delta: None,
        });
    }
    out
}

fn diff_functions(old: &[FunctionDef], new: &[FunctionDef]) -> Vec<FunctionDiff> {
    let mut out: Vec<FunctionDiff> = old
        .iter()
        .map(|before| {
            let after = new.iter().find(|f| f.name == before.name);
            let status = match after {
                None => DiffStatus::Removed,
                Some(a) if a.address != before.address => DiffStatus::Modified,
                Some(_) => DiffStatus::Unchanged,
            };
            FunctionDiff {
                name: before.name.clone(),
                status,
                old_address: before.address,
                new_address: after.and_then(|a| a.address),
            }
        })
        .collect();
    for after in new.iter().filter(|f| !old.iter().any(|o| o.name == f.name)) {
        out.push(FunctionDiff {
            name: after.name.clone(),
            status: DiffStatus::Added,
            old_address: None,
            new_address: after.address,
        });
    }
    out
}

fn diff_struct(old: &StructDef, new: &StructDef) -> StructDiff {
    let fields = diff_fields(&old.fields, &new.fields);
    let vfuncs = diff_vfuncs(&old.vfuncs, &new.vfuncs);
    let functions = diff_functions(&old.functions, &new.functions);

    let members_changed = fields.iter().any(|f| f.status != DiffStatus::Unchanged)
        || vfuncs.iter().any(|v| v.status != DiffStatus::Unchanged)
        || functions.iter().any(|f| f.status != DiffStatus::Unchanged);
    let modified = members_changed || old.size != new.size || old.base != new.base;

    StructDiff {
        name: old.name.clone(),
        status: if modified { DiffStatus::Modified } else { DiffStatus::Unchanged },
        old_size: old.size,
        new_size: new.size,
        old_base: old.base.clone(),
        new_base: new.base.clone(),
        fields: if modified { fields } else { Vec::new() },
        vfuncs: if modified { vfuncs } else { Vec::new() },
        functions: if modified { functions } else { Vec::new() },
    }
}

fn whole_struct(def: &StructDef, status: DiffStatus) -> StructDiff {
    let (old, new) = match status {
        DiffStatus::Added => (None, Some(def)),
        _ => (Some(def), None),
    };
    StructDiff {
        name: def.name.clone(),
        status,
        old_size: old.and_then(|d| d.size),
        new_size: new.and_then(|d| d.size),
        old_base: old.and_then(|d| d.base.clone()),
        new_base: new.and_then(|d| d.base.clone()),
        fields: Vec::new(),
        vfuncs: Vec::new(),
        functions: Vec::new(),
    }
}

fn candidate(hierarchy: &str, kind: CandidateKind, samples: &[DeltaSample]) -> Option<HierarchyDeltaCandidate> {
    let cluster = majority_shift(samples)?;
    let what = match kind {
        CandidateKind::Field => "fields",
        CandidateKind::VtableSlot => "vtable slots",
    };
    Some(HierarchyDeltaCandidate {
        hierarchy: hierarchy.to_string(),
        kind,
        label: format!("{hierarchy}: {what} {}", format_delta(cluster.delta)),
        delta: cluster.delta,
        affected_structs: cluster.affected_structs(),
        affected_members: cluster.affected_members(),
        match_count: cluster.match_count(),
        total_candidates: cluster.total_candidates,
        confidence: cluster.confidence,
        anomalies: cluster.anomalies,
        enabled: true,
    })
}

/// Compare two snapshots and propose per-hierarchy shift hypotheses.
pub fn compare(old: &LayoutSnapshot, new: &LayoutSnapshot) -> DriftReport {
    let mut struct_diffs = Vec::new();
    for before in &old.structs {
        match new.struct_by_name(&before.name) {
            Some(after) => struct_diffs.push(diff_struct(before, after)),
            None => struct_diffs.push(whole_struct(before, DiffStatus::Removed)),
        }
    }
    for after in new.structs.iter().filter(|s| old.struct_by_name(&s.name).is_none()) {
        struct_diffs.push(whole_struct(after, DiffStatus::Added));
    }

    // hierarchy root -> samples of every member present in both versions
    let mut field_samples: BTreeMap<String, Vec<DeltaSample>> = BTreeMap::new();
    let mut slot_samples: BTreeMap<String, Vec<DeltaSample>> = BTreeMap::new();
    for before in &old.structs {
        let Some(after) = new.struct_by_name(&before.name) else {
            continue;
        };
        let root = old.hierarchy_root(&before.name);
        for field in &before.fields {
            let key = field.key();
            if let Some(moved_to) = after.field_by_key(&key) {
                field_samples.entry(root.clone()).or_default().push(DeltaSample::from_offsets(
                    &before.name,
                    key,
                    field.offset,
                    moved_to.offset,
                ));
            }
        }
        for slot in &before.vfuncs {
            if let Some(moved_to) = after.vfuncs.iter().find(|v| v.name == slot.name) {
                slot_samples.entry(root.clone()).or_default().push(DeltaSample::new(
                    &before.name,
                    &slot.name,
                    i64::from(slot.slot),
                    i64::from(moved_to.slot),
                ));
            }
        }
    }

    let mut candidates = Vec::new();
    for (root, samples) in &field_samples {
        candidates.extend(candidate(root, CandidateKind::Field, samples));
    }
    for (root, samples) in &slot_samples {
        candidates.extend(candidate(root, CandidateKind::VtableSlot, samples));
    }
    for c in &candidates {
        debug!(label = %c.label, confidence = c.confidence, anomalies = c.anomalies.len(), "hierarchy shift candidate");
    }

    let report = DriftReport {
        old_version: old.version.clone(),
        new_version: new.version.clone(),
        struct_diffs,
        candidates,
    };
    info!(
        modified = report.count(DiffStatus::Modified),
        added = report.count(DiffStatus::Added),
        removed = report.count(DiffStatus::Removed),
        candidates = report.candidates.len(),
        "layout comparison finished"
    );
    report
}

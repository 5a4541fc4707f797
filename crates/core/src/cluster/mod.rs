//! Delta clustering.
//!
//! Pure functions that turn scattered per-member offset deltas into a few
//! "bulk shift" hypotheses. Used by the scanner (exact-delta groups), the
//! drift detector and the cross-verifier (per-hierarchy majority vote).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Minimum number of agreeing samples before a delta counts as a pattern.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// One member (field or vtable slot) compared across two versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSample {
    pub struct_name: String,
    pub member: String,
    pub old_offset: i64,
    pub new_offset: i64,
    pub delta: i64,
}

impl DeltaSample {
    pub fn new(
        struct_name: impl Into<String>,
        member: impl Into<String>,
        old_offset: i64,
        new_offset: i64,
    ) -> Self {
        Self {
            struct_name: struct_name.into(),
            member: member.into(),
            old_offset,
            new_offset,
            delta: new_offset.saturating_sub(old_offset),
        }
    }

    /// Sample from unsigned offsets as read from layout or signature files.
    pub fn from_offsets(
        struct_name: impl Into<String>,
        member: impl Into<String>,
        old_offset: u64,
        new_offset: u64,
    ) -> Self {
        Self {
            struct_name: struct_name.into(),
            member: member.into(),
            old_offset: i64::try_from(old_offset).unwrap_or(i64::MAX),
            new_offset: i64::try_from(new_offset).unwrap_or(i64::MAX),
            delta: offset_delta(old_offset, new_offset),
        }
    }

    /// `Struct::member`
    pub fn qualified(&self) -> String {
        format!("{}::{}", self.struct_name, self.member)
    }
}

/// A delta value shared by several samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaCluster {
    pub delta: i64,
    pub members: Vec<DeltaSample>,
    /// Samples that disagree with `delta`, kept for manual review.
    pub anomalies: Vec<DeltaSample>,
    pub total_candidates: usize,
    /// `members / total_candidates`, in `[0, 1]`.
    pub confidence: f64,
}

impl DeltaCluster {
    pub fn match_count(&self) -> usize {
        self.members.len()
    }

    /// Distinct struct names among the members, sorted.
    pub fn affected_structs(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.members.iter().map(|m| m.struct_name.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    pub fn affected_members(&self) -> Vec<String> {
        self.members.iter().map(DeltaSample::qualified).collect()
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64).clamp(0.0, 1.0)
}

/// `new - old`, saturated to the `i64` range.
pub fn offset_delta(old: u64, new: u64) -> i64 {
    let delta = i128::from(new) - i128::from(old);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

/// Human-readable signed hex, e.g. `+0x8` / `-0x10`.
pub fn format_delta(delta: i64) -> String {
    if delta < 0 {
        format!("-0x{:x}", delta.unsigned_abs())
    } else {
        format!("+0x{delta:x}")
    }
}

/// Group samples by exact delta and keep every delta shared by at least
/// [`MIN_CLUSTER_SIZE`] samples.
///
/// Each sample lands in at most one cluster. Anomalies of a cluster are the
/// samples of its structs that carry a different delta. Output is ordered by
/// member count (descending), then delta.
pub fn group_by_delta(samples: &[DeltaSample]) -> Vec<DeltaCluster> {
    let mut by_delta: BTreeMap<i64, Vec<&DeltaSample>> = BTreeMap::new();
    for sample in samples {
        by_delta.entry(sample.delta).or_default().push(sample);
    }

    let mut clusters: Vec<DeltaCluster> = by_delta
        .into_iter()
        .filter(|(_, members)| members.len() >= MIN_CLUSTER_SIZE)
        .map(|(delta, members)| {
            let structs: BTreeSet<&str> = members.iter().map(|m| m.struct_name.as_str()).collect();
            let anomalies: Vec<DeltaSample> = samples
                .iter()
                .filter(|s| s.delta != delta && structs.contains(s.struct_name.as_str()))
                .cloned()
                .collect();
            let total_candidates = members.len() + anomalies.len();
            DeltaCluster {
                delta,
                confidence: ratio(members.len(), total_candidates),
                members: members.into_iter().cloned().collect(),
                anomalies,
                total_candidates,
            }
        })
        .collect();

    clusters.sort_by(|a, b| b.members.len().cmp(&a.members.len()).then(a.delta.cmp(&b.delta)));
    clusters
}

/// Majority vote over one group (e.g. every compared field of a hierarchy).
///
/// The most frequent non-zero delta wins; ties go to the smaller magnitude,
/// then the smaller value. Returns `None` unless at least
/// [`MIN_CLUSTER_SIZE`] samples agree. Confidence is agreeing samples over
/// all samples, unmoved ones included. Other non-zero samples are anomalies.
pub fn majority_shift(samples: &[DeltaSample]) -> Option<DeltaCluster> {
    let moved: Vec<&DeltaSample> = samples.iter().filter(|s| s.delta != 0).collect();
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for sample in &moved {
        *counts.entry(sample.delta).or_default() += 1;
    }

    let (delta, count) = counts.into_iter().max_by(|(da, ca), (db, cb)| {
        ca.cmp(cb)
            .then_with(|| db.unsigned_abs().cmp(&da.unsigned_abs()))
            .then_with(|| db.cmp(da))
    })?;
    if count < MIN_CLUSTER_SIZE {
        return None;
    }

    let (members, anomalies): (Vec<&DeltaSample>, Vec<&DeltaSample>) =
        moved.iter().partition(|s| s.delta == delta);
    Some(DeltaCluster {
        delta,
        confidence: ratio(members.len(), samples.len()),
        members: members.into_iter().cloned().collect(),
        anomalies: anomalies.into_iter().cloned().collect(),
        total_candidates: samples.len(),
    })
}

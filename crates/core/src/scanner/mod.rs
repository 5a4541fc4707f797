//! Binary scanner: signature extraction and matching over one PE image.
//!
//! A [`BinaryScanner`] owns the raw bytes of a single binary. The PE headers
//! are parsed eagerly; the displacement index is built on first use and then
//! shared by every extraction and scan on the same scanner.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{format_delta, group_by_delta, offset_delta, DeltaSample};
use crate::index::{
    DisplacementEntry, DisplacementIndex, IndexStats, InstructionShape, MAX_FIELD_DISPLACEMENT,
};
use crate::model::DeclaredField;
use crate::pattern::{format_bytes, Pattern, PatternError};
use crate::pe::PeImage;
use crate::signature::{
    confidence, extraction_confidence, Signature, SignatureKind, SignatureMatch, StructSignatures,
    SIGNATURE_FORMAT_VERSION, VTABLE_FIELD,
};

pub const LIKELY_CAUSE_SINGLE: &str = "single struct: fields shifted";
pub const LIKELY_CAUSE_MULTI: &str = "multiple structs: possible base-class size change";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read binary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{identifier} is not a valid PE image: {reason}")]
    InvalidPe { identifier: String, reason: String },

    #[error("Signature {struct_name}::{field_name} has a malformed pattern: {source}")]
    Pattern {
        struct_name: String,
        field_name: String,
        #[source]
        source: PatternError,
    },
}

/// Knobs for [`BinaryScanner::extract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Signatures scoring below this are dropped (counted in the summary).
    pub min_confidence: u8,
    /// Fields referenced by more instructions than this are too ambiguous.
    pub max_occurrences: usize,
    /// Fixed bytes captured on each side of the instruction.
    pub context_bytes: usize,
    pub include_rtti: bool,
    pub binary_version: Option<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_confidence: 50,
            max_occurrences: 10,
            context_bytes: 8,
            include_rtti: true,
            binary_version: None,
        }
    }
}

/// How many declared fields were attempted vs. covered by a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub attempted: usize,
    pub covered: usize,
    /// No instruction references the declared offset.
    pub absent: usize,
    /// More candidate sites than `max_occurrences`.
    pub ambiguous: usize,
    pub below_threshold: usize,
    pub rtti_anchors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub sets: Vec<StructSignatures>,
    pub summary: ExtractionSummary,
}

impl Extraction {
    pub fn signature_count(&self) -> usize {
        self.sets.iter().map(|s| s.signatures.len()).sum()
    }
}

/// A field whose observed offset differs from the declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub struct_name: String,
    pub field_name: String,
    pub declared_offset: u64,
    pub observed_offset: u64,
    pub delta: i64,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_label: Option<String>,
    /// Offsets seen by other signatures of the same field that disagree with
    /// `observed_offset`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_offsets: Vec<u64>,
}

/// A delta shared by at least two changed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePattern {
    pub label: String,
    pub delta: i64,
    pub affected_structs: Vec<String>,
    /// `Struct::field` entries that carry this delta.
    pub affected_fields: Vec<String>,
    pub match_count: usize,
    pub total_candidates: usize,
    pub confidence: f64,
    pub likely_cause: String,
    /// Changes in the same structs whose delta disagrees.
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub binary_identifier: String,
    pub binary_hash: String,
    pub scanned_at: String,
    pub signatures_matched: usize,
    pub signatures_missing: usize,
    pub signatures_total: usize,
    pub matches: Vec<SignatureMatch>,
    pub changes: Vec<FieldChange>,
    pub pattern_groups: Vec<ChangePattern>,
}

impl ScanResult {
    /// Every signature was found.
    pub fn is_complete(&self) -> bool {
        self.signatures_missing == 0
    }

    pub fn missing(&self) -> impl Iterator<Item = &SignatureMatch> {
        self.matches.iter().filter(|m| !m.found)
    }
}

/// Header view plus identity of the scanned buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeSummary {
    pub identifier: String,
    pub size: usize,
    pub binary_hash: String,
    #[serde(flatten)]
    pub image: PeImage,
}

#[derive(Debug)]
pub struct BinaryScanner {
    identifier: String,
    bytes: Vec<u8>,
    image: PeImage,
    hash: OnceLock<String>,
    index: OnceLock<DisplacementIndex>,
}

impl BinaryScanner {
    pub fn new(identifier: impl Into<String>, bytes: Vec<u8>) -> Self {
        let image = PeImage::parse(&bytes);
        Self {
            identifier: identifier.into(),
            bytes,
            image,
            hash: OnceLock::new(),
            index: OnceLock::new(),
        }
    }

    /// Read a binary from disk; the file name becomes the identifier.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|source| ScanError::Io { path: path.display().to_string(), source })?;
        let identifier = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(identifier, bytes))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn image(&self) -> &PeImage {
        &self.image
    }

    /// SHA-256 hex digest of the whole buffer.
    pub fn binary_hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(&self.bytes);
            format!("{:x}", hasher.finalize())
        })
    }

    fn ensure_valid(&self) -> Result<(), ScanError> {
        if self.image.valid {
            return Ok(());
        }
        let reason = self
            .image
            .error
            .as_ref()
            .map_or_else(|| "unknown error".to_string(), ToString::to_string);
        Err(ScanError::InvalidPe { identifier: self.identifier.clone(), reason })
    }

    /// The displacement index, built on first call.
    pub fn index(&self) -> Result<&DisplacementIndex, ScanError> {
        self.ensure_valid()?;
        Ok(self.index.get_or_init(|| DisplacementIndex::build(&self.image, &self.bytes)))
    }

    pub fn index_stats(&self, top: usize) -> Result<IndexStats, ScanError> {
        Ok(self.index()?.stats(top))
    }

    /// Header summary; available for invalid images too.
    pub fn pe_summary(&self) -> PeSummary {
        PeSummary {
            identifier: self.identifier.clone(),
            size: self.bytes.len(),
            binary_hash: self.binary_hash().to_string(),
            image: self.image.clone(),
        }
    }

    fn executable_ranges(&self) -> Vec<Range<usize>> {
        self.image.executable_sections().map(|s| s.file_range(self.bytes.len())).collect()
    }

    fn search_ranges(&self, kind: SignatureKind) -> Vec<Range<usize>> {
        if kind.is_code() {
            self.executable_ranges()
        } else {
            vec![0..self.bytes.len()]
        }
    }

    /// Fixed bytes around `at..at+len`, clamped to the section holding `at`.
    fn context_around(&self, at: usize, len: usize, width: usize) -> (Option<String>, Option<String>) {
        if width == 0 {
            return (None, None);
        }
        let Some(range) = self.executable_ranges().into_iter().find(|r| r.contains(&at)) else {
            return (None, None);
        };
        let before_start = at.saturating_sub(width).max(range.start);
        let after_start = (at + len).min(range.end);
        let after_end = after_start.saturating_add(width).min(range.end);
        let encode = |raw: &[u8]| (!raw.is_empty()).then(|| format_bytes(raw));
        (encode(&self.bytes[before_start..at]), encode(&self.bytes[after_start..after_end]))
    }

    /// Synthesize signatures for `fields` from this binary.
    ///
    /// Each field is looked up in the displacement index by its declared
    /// offset. Fields with no referencing instruction, or with more than
    /// `max_occurrences`, get no signature.
    pub fn extract(&self, fields: &[DeclaredField], options: &ExtractOptions) -> Result<Extraction, ScanError> {
        let index = self.index()?;
        let mut summary = ExtractionSummary::default();
        let mut by_struct: Vec<(String, Vec<Signature>)> = Vec::new();

        for field in fields {
            summary.attempted += 1;
            let entries: &[DisplacementEntry] = match u32::try_from(field.offset) {
                Ok(offset) if offset < MAX_FIELD_DISPLACEMENT => index.lookup(offset),
                _ => &[],
            };
            if entries.is_empty() {
                summary.absent += 1;
                continue;
            }
            if entries.len() > options.max_occurrences {
                debug!(
                    field = %format!("{}::{}", field.struct_name, field.field_name),
                    sites = entries.len(),
                    "field too ambiguous to sign"
                );
                summary.ambiguous += 1;
                continue;
            }

            let score = extraction_confidence(SignatureKind::FieldAccess, entries.len());
            if score < options.min_confidence {
                summary.below_threshold += 1;
                continue;
            }

            let first = &entries[0];
            let disp = InstructionShape::DISP_OFFSET..InstructionShape::DISP_OFFSET + 4;
            let pattern = Pattern::with_wildcards(&first.instruction_bytes, disp);
            let (context_before, context_after) =
                self.context_around(first.file_offset, pattern.len(), options.context_bytes);
            let signature = Signature {
                kind: SignatureKind::FieldAccess,
                struct_name: field.struct_name.clone(),
                field_name: field.field_name.clone(),
                expected_offset: field.offset,
                pattern: pattern.to_string(),
                context_before,
                context_after,
                base_confidence: score,
                instruction: Some(first.kind),
                notes: Some(format!(
                    "{} at file offset {:#x}, {} candidate site(s)",
                    first.kind.as_str(),
                    first.file_offset,
                    entries.len()
                )),
            };
            summary.covered += 1;
            push_signature(&mut by_struct, signature);
        }

        if options.include_rtti {
            let mut names: Vec<&str> = Vec::new();
            for field in fields {
                if !names.contains(&field.struct_name.as_str()) {
                    names.push(&field.struct_name);
                }
            }
            for name in names {
                if let Some(signature) = self.rtti_signature(name, options) {
                    summary.rtti_anchors += 1;
                    push_signature(&mut by_struct, signature);
                }
            }
        }

        let extracted_at = Utc::now().to_rfc3339();
        let sets = by_struct
            .into_iter()
            .map(|(struct_name, signatures)| StructSignatures {
                struct_name,
                binary_hash: self.binary_hash().to_string(),
                binary_version: options.binary_version.clone(),
                format_version: SIGNATURE_FORMAT_VERSION,
                extracted_at: extracted_at.clone(),
                signatures,
            })
            .collect();

        info!(
            binary = %self.identifier,
            attempted = summary.attempted,
            covered = summary.covered,
            absent = summary.absent,
            ambiguous = summary.ambiguous,
            rtti = summary.rtti_anchors,
            "signature extraction finished"
        );
        Ok(Extraction { sets, summary })
    }

    /// Vtable anchor from an RTTI type-name string (`Name@@`).
    fn rtti_signature(&self, struct_name: &str, options: &ExtractOptions) -> Option<Signature> {
        let needle = format!("{struct_name}@@");
        let hits = memchr::memmem::find_iter(&self.bytes, needle.as_bytes())
            .filter(|&at| rtti_boundary(&self.bytes, at))
            .count();
        if hits == 0 {
            return None;
        }
        let score = extraction_confidence(SignatureKind::Rtti, hits);
        if score < options.min_confidence {
            return None;
        }
        Some(Signature {
            kind: SignatureKind::Rtti,
            struct_name: struct_name.to_string(),
            field_name: VTABLE_FIELD.to_string(),
            expected_offset: 0,
            pattern: format_bytes(needle.as_bytes()),
            context_before: None,
            context_after: None,
            base_confidence: score,
            instruction: None,
            notes: Some(format!("RTTI type name {needle:?}, {hits} occurrence(s)")),
        })
    }

    /// Match one signature against this binary.
    ///
    /// The pattern is tried with its context attached first, then bare. When
    /// several sites match, the displacement seen at the most sites wins and
    /// ties go to the earliest site.
    pub fn match_signature(&self, signature: &Signature) -> Result<SignatureMatch, ScanError> {
        self.ensure_valid()?;
        let parse = |text: &str| {
            Pattern::parse(text).map_err(|source| ScanError::Pattern {
                struct_name: signature.struct_name.clone(),
                field_name: signature.field_name.clone(),
                source,
            })
        };
        let pattern = parse(&signature.pattern)?;
        let before = signature.context_before.as_deref().map(parse).transpose()?;
        let after = signature.context_after.as_deref().map(parse).transpose()?;

        let ranges = self.search_ranges(signature.kind);
        let find = |p: &Pattern| -> Vec<usize> {
            ranges.iter().flat_map(|r| p.find_all(&self.bytes, r.clone())).collect()
        };

        let mut context_matched = false;
        let mut hits = Vec::new();
        if before.is_some() || after.is_some() {
            let empty = Pattern::from_bytes(&[]);
            let lead = before.as_ref().unwrap_or(&empty);
            let full = Pattern::concat(&[lead, &pattern, after.as_ref().unwrap_or(&empty)]);
            hits = find(&full).into_iter().map(|at| at + lead.len()).collect();
            context_matched = !hits.is_empty();
        }
        if hits.is_empty() {
            hits = find(&pattern);
        }
        if hits.is_empty() {
            return Ok(SignatureMatch::missing(signature));
        }

        let observe = |at: usize| -> Option<u64> {
            if pattern.wildcard_run().is_none() {
                return Some(signature.expected_offset);
            }
            pattern.extract_displacement(&self.bytes, at).and_then(|v| u64::try_from(v).ok())
        };
        let (file_offset, observed_offset) = majority_site(&hits, observe);

        Ok(SignatureMatch {
            struct_name: signature.struct_name.clone(),
            field_name: signature.field_name.clone(),
            kind: signature.kind,
            expected_offset: signature.expected_offset,
            found: true,
            file_offset: Some(file_offset),
            observed_offset,
            confidence: confidence(signature.kind, hits.len(), context_matched),
            occurrence_count: hits.len(),
            context_matched,
        })
    }

    /// Match every signature of every collection and cluster the changes.
    pub fn scan(&self, sets: &[StructSignatures]) -> Result<ScanResult, ScanError> {
        self.ensure_valid()?;
        let hash = self.binary_hash().to_string();
        let mut matches = Vec::new();
        for set in sets {
            if set.binary_hash != hash {
                debug!(struct_name = %set.struct_name, "signatures come from a different build");
            }
            for signature in &set.signatures {
                matches.push(self.match_signature(signature)?);
            }
        }

        let mut changes = field_changes(&matches);
        let pattern_groups = cluster_changes(&mut changes);

        let matched = matches.iter().filter(|m| m.found).count();
        let result = ScanResult {
            binary_identifier: self.identifier.clone(),
            binary_hash: hash,
            scanned_at: Utc::now().to_rfc3339(),
            signatures_matched: matched,
            signatures_missing: matches.len() - matched,
            signatures_total: matches.len(),
            matches,
            changes,
            pattern_groups,
        };
        if !result.is_complete() {
            warn!(
                binary = %result.binary_identifier,
                missing = result.signatures_missing,
                "some signatures were not found"
            );
        }
        info!(
            binary = %result.binary_identifier,
            matched = result.signatures_matched,
            changes = result.changes.len(),
            patterns = result.pattern_groups.len(),
            "scan finished"
        );
        Ok(result)
    }
}

fn push_signature(by_struct: &mut Vec<(String, Vec<Signature>)>, signature: Signature) {
    match by_struct.iter_mut().find(|(name, _)| *name == signature.struct_name) {
        Some((_, list)) => list.push(signature),
        None => by_struct.push((signature.struct_name.clone(), vec![signature])),
    }
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// `Name@@` must start a name: either at a non-identifier byte or right
/// after an MSVC type-descriptor prefix (`.?AV` / `.?AU`).
fn rtti_boundary(bytes: &[u8], at: usize) -> bool {
    if at == 0 || !is_identifier_byte(bytes[at - 1]) {
        return true;
    }
    at >= 4 && matches!(&bytes[at - 4..at], b".?AV" | b".?AU")
}

/// Pick the site whose observed value is most common; ties keep the earliest.
fn majority_site(hits: &[usize], observe: impl Fn(usize) -> Option<u64>) -> (usize, Option<u64>) {
    let mut tally: HashMap<u64, (usize, usize)> = HashMap::new();
    for &at in hits {
        if let Some(value) = observe(at) {
            let entry = tally.entry(value).or_insert((0, at));
            entry.0 += 1;
        }
    }
    tally
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
        .map_or((hits[0], None), |(value, (_, first))| (first, Some(value)))
}

/// Reduce matches to at most one change per `(struct, field)`.
///
/// A field with several signatures keeps its highest-confidence changed
/// observation (the first one on ties); every other offset its signatures
/// observed is recorded in `conflicting_offsets`.
fn field_changes(matches: &[SignatureMatch]) -> Vec<FieldChange> {
    let mut by_field: Vec<((&str, &str), Vec<&SignatureMatch>)> = Vec::new();
    for m in matches.iter().filter(|m| m.found && m.observed_offset.is_some()) {
        let key = (m.struct_name.as_str(), m.field_name.as_str());
        match by_field.iter_mut().find(|(k, _)| *k == key) {
            Some((_, list)) => list.push(m),
            None => by_field.push((key, vec![m])),
        }
    }

    let mut changes = Vec::new();
    for (_, observations) in by_field {
        let best = observations
            .iter()
            .copied()
            .filter(|m| m.is_changed())
            .fold(None::<&SignatureMatch>, |best, m| match best {
                Some(b) if b.confidence >= m.confidence => Some(b),
                _ => Some(m),
            });
        let Some(best) = best else {
            continue;
        };
        let Some(observed) = best.observed_offset else {
            continue;
        };

        let mut conflicting_offsets: Vec<u64> = observations
            .iter()
            .filter_map(|m| m.observed_offset)
            .filter(|&o| o != observed)
            .collect();
        conflicting_offsets.sort_unstable();
        conflicting_offsets.dedup();
        if !conflicting_offsets.is_empty() {
            warn!(
                struct_name = %best.struct_name,
                field = %best.field_name,
                observed,
                others = conflicting_offsets.len(),
                "signatures of one field disagree"
            );
        }

        changes.push(FieldChange {
            struct_name: best.struct_name.clone(),
            field_name: best.field_name.clone(),
            declared_offset: best.expected_offset,
            observed_offset: observed,
            delta: offset_delta(best.expected_offset, observed),
            confidence: best.confidence,
            cluster_label: None,
            conflicting_offsets,
        });
    }
    changes
}

/// Group changes by exact delta and label each change with its cluster.
///
/// Members whose signatures disagreed are also listed as anomalies of the
/// pattern they joined.
fn cluster_changes(changes: &mut [FieldChange]) -> Vec<ChangePattern> {
    let samples: Vec<DeltaSample> = changes
        .iter()
        .map(|c| {
            DeltaSample::from_offsets(&c.struct_name, &c.field_name, c.declared_offset, c.observed_offset)
        })
        .collect();
    let clusters = group_by_delta(&samples);

    let mut labels: BTreeMap<(String, String), String> = BTreeMap::new();
    let patterns: Vec<ChangePattern> = clusters
        .into_iter()
        .map(|cluster| {
            let label = format!("delta {}", format_delta(cluster.delta));
            let mut anomalies: Vec<String> =
                cluster.anomalies.iter().map(DeltaSample::qualified).collect();
            for member in &cluster.members {
                labels.insert((member.struct_name.clone(), member.member.clone()), label.clone());
                let disputed = changes.iter().any(|c| {
                    c.struct_name == member.struct_name
                        && c.field_name == member.member
                        && !c.conflicting_offsets.is_empty()
                });
                if disputed {
                    anomalies.push(member.qualified());
                }
            }
            let affected_structs = cluster.affected_structs();
            let likely_cause =
                if affected_structs.len() > 1 { LIKELY_CAUSE_MULTI } else { LIKELY_CAUSE_SINGLE };
            ChangePattern {
                label,
                delta: cluster.delta,
                affected_fields: cluster.affected_members(),
                match_count: cluster.match_count(),
                total_candidates: cluster.total_candidates,
                confidence: cluster.confidence,
                likely_cause: likely_cause.to_string(),
                anomalies,
                affected_structs,
            }
        })
        .collect();

    for change in changes.iter_mut() {
        let key = (change.struct_name.clone(), change.field_name.clone());
        change.cluster_label = labels.get(&key).cloned();
    }
    debug!(patterns = patterns.len(), "clustered field changes");
    patterns
}

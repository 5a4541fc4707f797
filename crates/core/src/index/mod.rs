//! Displacement index over the executable sections of a PE image.
//!
//! A single linear pass recognizes a small table of `[reg + disp32]`
//! instruction shapes and files every occurrence under its displacement, so
//! per-field lookups are a hash probe instead of a full binary scan.
//!
//! Recognized shapes (REX.W prefix, opcode, ModR/M with mod=10 and rm!=100):
//!
//! ```text
//! 48 8B /r disp32   mov r64, [base + disp32]   MovRead
//! 48 89 /r disp32   mov [base + disp32], r64   MovWrite
//! 48 8D /r disp32   lea r64, [base + disp32]   Lea
//! ```
//!
//! rm=100 would introduce a SIB byte; those forms are deliberately not decoded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pe::{PeImage, Section};

/// Displacements at or above this value are treated as noise, not field offsets.
pub const MAX_FIELD_DISPLACEMENT: u32 = 0x10_0000;

/// Kind of instruction that referenced a displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    MovRead,
    MovWrite,
    Lea,
}

impl InstructionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionKind::MovRead => "mov-read",
            InstructionKind::MovWrite => "mov-write",
            InstructionKind::Lea => "lea",
        }
    }
}

/// One recognizable instruction encoding.
#[derive(Debug, Clone, Copy)]
pub struct InstructionShape {
    pub prefix: u8,
    pub opcode: u8,
    pub kind: InstructionKind,
}

impl InstructionShape {
    /// Prefix + opcode + ModR/M + disp32.
    pub const LEN: usize = 7;
    /// Offset of the disp32 within the encoding.
    pub const DISP_OFFSET: usize = 3;

    /// Match this shape at `code[at..]`, returning the raw displacement.
    fn decode(&self, code: &[u8], at: usize) -> Option<i32> {
        let insn = code.get(at..at + Self::LEN)?;
        if insn[0] != self.prefix || insn[1] != self.opcode {
            return None;
        }
        let modrm = insn[2];
        if modrm >> 6 != 0b10 || modrm & 0b111 == 0b100 {
            return None;
        }
        Some(i32::from_le_bytes([insn[3], insn[4], insn[5], insn[6]]))
    }
}

/// Shapes the indexer recognizes. SIB-addressed forms would be appended here.
pub const SHAPES: &[InstructionShape] = &[
    InstructionShape { prefix: 0x48, opcode: 0x8B, kind: InstructionKind::MovRead },
    InstructionShape { prefix: 0x48, opcode: 0x89, kind: InstructionKind::MovWrite },
    InstructionShape { prefix: 0x48, opcode: 0x8D, kind: InstructionKind::Lea },
];

/// A single instruction occurrence referencing a displacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplacementEntry {
    pub file_offset: usize,
    pub kind: InstructionKind,
    /// The full matched instruction bytes, used for pattern synthesis.
    pub instruction_bytes: Vec<u8>,
}

/// Read-only summary of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub unique_offsets: usize,
    pub total_entries: usize,
    /// `(displacement, occurrences)`, most frequent first.
    pub top_offsets: Vec<(u32, usize)>,
}

/// Mapping from displacement value to every instruction that uses it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplacementIndex {
    entries: HashMap<u32, Vec<DisplacementEntry>>,
}

impl DisplacementIndex {
    /// Index every executable section of `image` within `buffer`.
    pub fn build(image: &PeImage, buffer: &[u8]) -> Self {
        let mut index = Self::default();
        for section in image.executable_sections() {
            index.index_section(section, buffer);
        }
        debug!(
            unique = index.entries.len(),
            total = index.total_entries(),
            "displacement index built"
        );
        index
    }

    fn index_section(&mut self, section: &Section, buffer: &[u8]) {
        let range = section.file_range(buffer.len());
        let base = range.start;
        let code = &buffer[range];
        if code.len() < InstructionShape::LEN {
            return;
        }
        let mut found = 0usize;
        for at in 0..=code.len() - InstructionShape::LEN {
            for shape in SHAPES {
                let Some(disp) = shape.decode(code, at) else { continue };
                if disp < 0 || disp as u32 >= MAX_FIELD_DISPLACEMENT {
                    continue;
                }
                self.entries.entry(disp as u32).or_default().push(DisplacementEntry {
                    file_offset: base + at,
                    kind: shape.kind,
                    instruction_bytes: code[at..at + InstructionShape::LEN].to_vec(),
                });
                found += 1;
            }
        }
        debug!(section = %section.name, entries = found, "indexed executable section");
    }

    /// Every occurrence of `displacement`, in discovery order.
    pub fn lookup(&self, displacement: u32) -> &[DisplacementEntry] {
        self.entries.get(&displacement).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unique_offsets(&self) -> usize {
        self.entries.len()
    }

    pub fn total_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Iterate `(displacement, entries)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[DisplacementEntry])> {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn stats(&self, top: usize) -> IndexStats {
        let mut counts: Vec<(u32, usize)> =
            self.entries.iter().map(|(disp, list)| (*disp, list.len())).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(top);
        IndexStats {
            unique_offsets: self.unique_offsets(),
            total_entries: self.total_entries(),
            top_offsets: counts,
        }
    }
}

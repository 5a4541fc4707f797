//! Minimal PE (Portable Executable) loader.
//!
//! Only the pieces the scanner needs are read: the DOS header, the COFF
//! header, the optional-header magic/entry point/image base, and the section
//! table. Imports, exports, relocations and resources are never touched.
//!
//! Parsing never fails loudly: structural problems produce a `PeImage` with
//! `valid == false` and the reason recorded in `error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DOS_MAGIC: u16 = 0x5A4D;
pub const PE_MAGIC: u32 = 0x0000_4550;
pub const OPTIONAL_MAGIC_PE32: u16 = 0x10B;
pub const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20B;

pub const MACHINE_I386: u16 = 0x014C;
pub const MACHINE_AMD64: u16 = 0x8664;
pub const MACHINE_ARM64: u16 = 0xAA64;

/// `IMAGE_SCN_CNT_CODE`
pub const SCN_CNT_CODE: u32 = 0x0000_0020;
/// `IMAGE_SCN_MEM_EXECUTE`
pub const SCN_MEM_EXECUTE: u32 = 0x2000_0000;

const E_LFANEW_OFFSET: usize = 0x3C;
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const MIN_OPTIONAL_HEADER_SIZE: usize = 32;

/// Why a buffer was rejected as a PE image.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeError {
    #[error("buffer too small for a DOS header ({0} bytes)")]
    TooSmall(usize),

    #[error("missing DOS magic (found {0:#06x})")]
    BadDosMagic(u16),

    #[error("PE header offset {0:#x} lies outside the buffer")]
    HeaderOutOfBounds(u32),

    #[error("missing PE signature (found {0:#010x})")]
    BadPeMagic(u32),

    #[error("truncated {0}")]
    Truncated(String),

    #[error("unknown optional header magic {0:#06x}")]
    UnknownOptionalMagic(u16),

    #[error("optional header magic {magic:#06x} does not match machine {machine:#06x}")]
    MachineMismatch { machine: u16, magic: u16 },
}

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_address: u32,
    pub raw_size: u32,
    pub characteristics: u32,
}

impl Section {
    /// Code or execute-memory characteristic set.
    pub fn is_executable(&self) -> bool {
        self.characteristics & (SCN_CNT_CODE | SCN_MEM_EXECUTE) != 0
    }

    /// Size of the section once mapped; falls back to the raw size when the
    /// linker left `VirtualSize` at zero.
    pub fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.raw_size
        } else {
            self.virtual_size
        }
    }

    /// File byte range backing this section, clamped to `buffer_len`.
    pub fn file_range(&self, buffer_len: usize) -> std::ops::Range<usize> {
        let start = (self.raw_address as usize).min(buffer_len);
        let end = start.saturating_add(self.raw_size as usize).min(buffer_len);
        start..end
    }

    /// Raw bytes of this section within `buffer` (possibly empty).
    pub fn data<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.file_range(buffer.len())]
    }
}

/// Parsed header view of a PE file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeImage {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PeError>,
    pub is_64bit: bool,
    pub machine: u16,
    pub image_base: u64,
    pub entry_point_rva: u32,
    pub sections: Vec<Section>,
}

impl PeImage {
    /// Parse the headers of `bytes`. Never panics; check `valid` before use.
    pub fn parse(bytes: &[u8]) -> Self {
        match parse_headers(bytes) {
            Ok(image) => image,
            Err(error) => Self::invalid(error),
        }
    }

    fn invalid(error: PeError) -> Self {
        Self {
            valid: false,
            error: Some(error),
            is_64bit: false,
            machine: 0,
            image_base: 0,
            entry_point_rva: 0,
            sections: Vec::new(),
        }
    }

    /// Sections classified as executable, in table order.
    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_executable())
    }

    /// Short architecture label for the COFF machine type.
    pub fn arch_name(&self) -> Option<&'static str> {
        match self.machine {
            MACHINE_AMD64 => Some("x86_64"),
            MACHINE_I386 => Some("x86"),
            MACHINE_ARM64 => Some("arm64"),
            _ => None,
        }
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Translate an RVA to a file offset, if a section backs it on disk.
    pub fn rva_to_offset(&self, rva: u32) -> Option<u32> {
        self.sections.iter().find_map(|s| {
            let delta = rva.checked_sub(s.virtual_address)?;
            if delta < s.mapped_size() && delta < s.raw_size {
                s.raw_address.checked_add(delta)
            } else {
                None
            }
        })
    }

    /// Translate a file offset to an RVA, if it falls inside a section's raw data.
    pub fn offset_to_rva(&self, offset: u32) -> Option<u32> {
        self.sections.iter().find_map(|s| {
            let delta = offset.checked_sub(s.raw_address)?;
            if delta < s.raw_size {
                s.virtual_address.checked_add(delta)
            } else {
                None
            }
        })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}

fn truncated(what: &str) -> PeError {
    PeError::Truncated(what.to_string())
}

fn section_name(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

fn parse_headers(bytes: &[u8]) -> Result<PeImage, PeError> {
    if bytes.len() < 0x40 {
        return Err(PeError::TooSmall(bytes.len()));
    }
    let dos_magic = read_u16(bytes, 0).ok_or_else(|| truncated("DOS header"))?;
    if dos_magic != DOS_MAGIC {
        return Err(PeError::BadDosMagic(dos_magic));
    }

    let e_lfanew = read_u32(bytes, E_LFANEW_OFFSET).ok_or_else(|| truncated("DOS header"))?;
    let pe_offset = e_lfanew as usize;
    let pe_magic = read_u32(bytes, pe_offset).ok_or(PeError::HeaderOutOfBounds(e_lfanew))?;
    if pe_magic != PE_MAGIC {
        return Err(PeError::BadPeMagic(pe_magic));
    }

    let coff = pe_offset + 4;
    if bytes.len() < coff + COFF_HEADER_SIZE {
        return Err(truncated("COFF header"));
    }
    let machine = read_u16(bytes, coff).ok_or_else(|| truncated("COFF header"))?;
    let section_count = read_u16(bytes, coff + 2).ok_or_else(|| truncated("COFF header"))?;
    let optional_size = read_u16(bytes, coff + 16).ok_or_else(|| truncated("COFF header"))?;

    let optional = coff + COFF_HEADER_SIZE;
    let optional_end = optional + optional_size as usize;
    if optional_size < 2 || bytes.len() < optional_end {
        return Err(truncated("optional header"));
    }
    let magic = read_u16(bytes, optional).ok_or_else(|| truncated("optional header"))?;
    let is_64bit = match magic {
        OPTIONAL_MAGIC_PE32 => false,
        OPTIONAL_MAGIC_PE32_PLUS => true,
        other => return Err(PeError::UnknownOptionalMagic(other)),
    };
    let width_mismatch = match machine {
        MACHINE_AMD64 | MACHINE_ARM64 => !is_64bit,
        MACHINE_I386 => is_64bit,
        _ => false,
    };
    if width_mismatch {
        return Err(PeError::MachineMismatch { machine, magic });
    }

    // entry point at +16 for both widths; image base at +24 (PE32+) or +28 (PE32)
    if (optional_size as usize) < MIN_OPTIONAL_HEADER_SIZE {
        return Err(truncated("optional header"));
    }
    let entry_point_rva = read_u32(bytes, optional + 16).ok_or_else(|| truncated("optional header"))?;
    let image_base = if is_64bit {
        read_u64(bytes, optional + 24)
    } else {
        read_u32(bytes, optional + 28).map(u64::from)
    }
    .ok_or_else(|| truncated("optional header"))?;

    let table = optional_end;
    let table_end = table + section_count as usize * SECTION_HEADER_SIZE;
    if bytes.len() < table_end {
        return Err(truncated("section table"));
    }
    let sections = (0..section_count as usize)
        .map(|i| {
            let at = table + i * SECTION_HEADER_SIZE;
            let field = |off: usize| read_u32(bytes, at + off).ok_or_else(|| truncated("section header"));
            Ok(Section {
                name: section_name(&bytes[at..at + 8]),
                virtual_size: field(8)?,
                virtual_address: field(12)?,
                raw_size: field(16)?,
                raw_address: field(20)?,
                characteristics: field(36)?,
            })
        })
        .collect::<Result<Vec<_>, PeError>>()?;

    Ok(PeImage {
        valid: true,
        error: None,
        is_64bit,
        machine,
        image_base,
        entry_point_rva,
        sections,
    })
}

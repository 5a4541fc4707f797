//! Synthetic PE images for integration tests.
#![allow(dead_code)]

pub const TEXT: u32 = 0x6000_0020;
pub const RDATA: u32 = 0x4000_0040;

const HEADERS_SIZE: usize = 0x1000;
const FILE_ALIGN: usize = 0x200;
const SECTION_ALIGN: u32 = 0x1000;

pub struct PeBuilder {
    machine: u16,
    pe32_plus: bool,
    sections: Vec<(String, u32, Vec<u8>)>,
}

impl PeBuilder {
    /// AMD64, PE32+.
    pub fn new() -> Self {
        Self { machine: 0x8664, pe32_plus: true, sections: Vec::new() }
    }

    pub fn pe32(mut self) -> Self {
        self.machine = 0x014C;
        self.pe32_plus = false;
        self
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn section(mut self, name: &str, characteristics: u32, data: Vec<u8>) -> Self {
        self.sections.push((name.to_string(), characteristics, data));
        self
    }

    pub fn text(self, data: Vec<u8>) -> Self {
        self.section(".text", TEXT, data)
    }

    pub fn rdata(self, data: Vec<u8>) -> Self {
        self.section(".rdata", RDATA, data)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADERS_SIZE];
        out[0..2].copy_from_slice(b"MZ");
        out[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        out[0x80..0x84].copy_from_slice(b"PE\0\0");

        let coff = 0x84;
        let optional_size: u16 = if self.pe32_plus { 0xF0 } else { 0xE0 };
        out[coff..coff + 2].copy_from_slice(&self.machine.to_le_bytes());
        out[coff + 2..coff + 4].copy_from_slice(&(self.sections.len() as u16).to_le_bytes());
        out[coff + 16..coff + 18].copy_from_slice(&optional_size.to_le_bytes());
        out[coff + 18..coff + 20].copy_from_slice(&0x22u16.to_le_bytes());

        let optional = coff + 20;
        let magic: u16 = if self.pe32_plus { 0x20B } else { 0x10B };
        out[optional..optional + 2].copy_from_slice(&magic.to_le_bytes());
        out[optional + 16..optional + 20].copy_from_slice(&0x1000u32.to_le_bytes());
        if self.pe32_plus {
            out[optional + 24..optional + 32].copy_from_slice(&0x1_4000_0000u64.to_le_bytes());
        } else {
            out[optional + 28..optional + 32].copy_from_slice(&0x40_0000u32.to_le_bytes());
        }

        let mut table = optional + optional_size as usize;
        let mut raw = HEADERS_SIZE;
        let mut va = SECTION_ALIGN;
        let mut bodies = Vec::new();
        for (name, characteristics, data) in &self.sections {
            let raw_size = data.len().div_ceil(FILE_ALIGN) * FILE_ALIGN;
            let mut header = [0u8; 40];
            let name_bytes = name.as_bytes();
            header[..name_bytes.len().min(8)].copy_from_slice(&name_bytes[..name_bytes.len().min(8)]);
            header[8..12].copy_from_slice(&(data.len() as u32).to_le_bytes());
            header[12..16].copy_from_slice(&va.to_le_bytes());
            header[16..20].copy_from_slice(&(raw_size as u32).to_le_bytes());
            header[20..24].copy_from_slice(&(raw as u32).to_le_bytes());
            header[36..40].copy_from_slice(&characteristics.to_le_bytes());
            out[table..table + 40].copy_from_slice(&header);

            let mut body = data.clone();
            body.resize(raw_size, 0);
            bodies.push(body);

            table += 40;
            raw += raw_size;
            va += (raw_size as u32).div_ceil(SECTION_ALIGN) * SECTION_ALIGN;
        }
        for body in bodies {
            out.extend_from_slice(&body);
        }
        out
    }
}

/// Filler between instructions so context bytes never overlap a neighbour.
pub const GAP: usize = 16;

/// Lay instructions out back to back, each followed by `GAP` bytes of `int3`.
pub fn code(instructions: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for insn in instructions {
        out.extend_from_slice(insn);
        out.extend(std::iter::repeat(0xCC).take(GAP));
    }
    out
}

/// File offset of the `n`-th instruction laid out by [`code`] at the start of
/// the first section (all instructions 7 bytes long).
pub fn insn_offset(n: usize) -> usize {
    0x1000 + n * (7 + GAP)
}

/// `mov r64, [base + disp32]` with the given ModR/M byte.
pub fn mov_read(modrm: u8, disp: u32) -> Vec<u8> {
    let mut v = vec![0x48, 0x8B, modrm];
    v.extend_from_slice(&disp.to_le_bytes());
    v
}

pub fn mov_write(modrm: u8, disp: u32) -> Vec<u8> {
    let mut v = vec![0x48, 0x89, modrm];
    v.extend_from_slice(&disp.to_le_bytes());
    v
}

pub fn lea(modrm: u8, disp: u32) -> Vec<u8> {
    let mut v = vec![0x48, 0x8D, modrm];
    v.extend_from_slice(&disp.to_le_bytes());
    v
}

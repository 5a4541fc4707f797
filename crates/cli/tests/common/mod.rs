//! Tiny PE32+ images for end-to-end tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const HEADERS_SIZE: usize = 0x1000;
const FILE_ALIGN: usize = 0x200;

/// AMD64 image with a `.text` section and an optional `.rdata` section.
pub fn pe_image(text: &[u8], rdata: &[u8]) -> Vec<u8> {
    let mut sections: Vec<(&[u8; 8], u32, &[u8])> = vec![(b".text\0\0\0", 0x6000_0020, text)];
    if !rdata.is_empty() {
        sections.push((b".rdata\0\0", 0x4000_0040, rdata));
    }

    let mut out = vec![0u8; HEADERS_SIZE];
    out[0..2].copy_from_slice(b"MZ");
    out[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    out[0x80..0x84].copy_from_slice(b"PE\0\0");
    out[0x84..0x86].copy_from_slice(&0x8664u16.to_le_bytes());
    out[0x86..0x88].copy_from_slice(&(sections.len() as u16).to_le_bytes());
    out[0x94..0x96].copy_from_slice(&0xF0u16.to_le_bytes());
    out[0x98..0x9A].copy_from_slice(&0x20Bu16.to_le_bytes());
    out[0x98 + 16..0x98 + 20].copy_from_slice(&0x1000u32.to_le_bytes());
    out[0x98 + 24..0x98 + 32].copy_from_slice(&0x1_4000_0000u64.to_le_bytes());

    let mut table = 0x98 + 0xF0;
    let mut raw = HEADERS_SIZE;
    let mut va = 0x1000u32;
    let mut bodies = Vec::new();
    for (name, characteristics, data) in sections {
        let raw_size = data.len().div_ceil(FILE_ALIGN) * FILE_ALIGN;
        out[table..table + 8].copy_from_slice(name);
        out[table + 8..table + 12].copy_from_slice(&(data.len() as u32).to_le_bytes());
        out[table + 12..table + 16].copy_from_slice(&va.to_le_bytes());
        out[table + 16..table + 20].copy_from_slice(&(raw_size as u32).to_le_bytes());
        out[table + 20..table + 24].copy_from_slice(&(raw as u32).to_le_bytes());
        out[table + 36..table + 40].copy_from_slice(&characteristics.to_le_bytes());

        let mut body = data.to_vec();
        body.resize(raw_size, 0);
        bodies.push(body);
        table += 40;
        raw += raw_size;
        va += 0x1000 * (raw_size as u32).div_ceil(0x1000);
    }
    for body in bodies {
        out.extend_from_slice(&body);
    }
    out
}

/// `mov r64, [base + disp32]` instructions separated by `int3` padding.
pub fn mov_reads(sites: &[(u8, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (modrm, disp) in sites {
        out.extend_from_slice(&[0x48, 0x8B, *modrm]);
        out.extend_from_slice(&disp.to_le_bytes());
        out.extend(std::iter::repeat(0xCC).take(16));
    }
    out
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write fixture");
    path
}

/// `Foo.fieldA` and `Bar.fieldB` at the given offsets.
pub fn two_struct_layout(version: &str, a: u64, b: u64) -> String {
    format!(
        r#"{{
  "version": "{version}",
  "structs": [
    {{ "name": "Foo", "fields": [ {{ "name": "fieldA", "offset": {a} }} ] }},
    {{ "name": "Bar", "fields": [ {{ "name": "fieldB", "offset": {b} }} ] }}
  ]
}}"#
    )
}

mod common;

use common::{code, insn_offset, lea, mov_read, mov_write, PeBuilder};
use drift_core::index::{DisplacementIndex, InstructionKind, MAX_FIELD_DISPLACEMENT};
use drift_core::pe::PeImage;

fn index_of(bytes: &[u8]) -> DisplacementIndex {
    let image = PeImage::parse(bytes);
    assert!(image.valid, "fixture should parse: {:?}", image.error);
    DisplacementIndex::build(&image, bytes)
}

#[test]
fn mov_read_at_section_start_is_indexed() {
    let bytes = PeBuilder::new().text(vec![0x48, 0x8B, 0x81, 0x10, 0x00, 0x00, 0x00]).build();
    let index = index_of(&bytes);

    let entries = index.lookup(0x10);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_offset, 0x1000);
    assert_eq!(entries[0].kind, InstructionKind::MovRead);
    assert_eq!(entries[0].kind.as_str(), "mov-read");
    assert_eq!(entries[0].instruction_bytes, vec![0x48, 0x8B, 0x81, 0x10, 0x00, 0x00, 0x00]);
}

#[test]
fn every_shape_files_under_its_displacement() {
    let bytes = PeBuilder::new()
        .text(code(&[mov_read(0x81, 0x10), mov_write(0x89, 0x10), lea(0x86, 0x48)]))
        .build();
    let index = index_of(&bytes);

    let kinds: Vec<_> = index.lookup(0x10).iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![InstructionKind::MovRead, InstructionKind::MovWrite]);
    assert_eq!(index.lookup(0x10)[1].file_offset, insn_offset(1));

    let lea_hits = index.lookup(0x48);
    assert_eq!(lea_hits.len(), 1);
    assert_eq!(lea_hits[0].kind, InstructionKind::Lea);
    assert_eq!(lea_hits[0].file_offset, insn_offset(2));

    assert_eq!(index.unique_offsets(), 2);
    assert_eq!(index.total_entries(), 3);
    assert!(index.lookup(0x20).is_empty());
}

#[test]
fn noise_and_sib_forms_are_skipped() {
    let bytes = PeBuilder::new()
        .text(code(&[
            mov_read(0x81, MAX_FIELD_DISPLACEMENT),
            mov_read(0x81, 0xFFFF_FFF0),
            mov_read(0x84, 0x30),
            mov_read(0x41, 0x30),
        ]))
        .build();
    let index = index_of(&bytes);
    assert_eq!(index.total_entries(), 0);
    assert!(index.lookup(MAX_FIELD_DISPLACEMENT).is_empty());
}

#[test]
fn non_executable_sections_are_ignored() {
    let bytes = PeBuilder::new()
        .text(code(&[mov_read(0x81, 0x10)]))
        .rdata(code(&[mov_read(0x81, 0x20)]))
        .build();
    let index = index_of(&bytes);
    assert_eq!(index.lookup(0x10).len(), 1);
    assert!(index.lookup(0x20).is_empty());
}

#[test]
fn building_twice_gives_the_same_index() {
    let bytes = PeBuilder::new()
        .text(code(&[mov_read(0x81, 0x10), lea(0x86, 0x18), mov_write(0x89, 0x18)]))
        .build();
    assert_eq!(index_of(&bytes), index_of(&bytes));
}

#[test]
fn stats_rank_the_most_referenced_offsets() {
    let bytes = PeBuilder::new()
        .text(code(&[
            mov_read(0x81, 0x10),
            mov_read(0x89, 0x18),
            mov_write(0x91, 0x18),
            lea(0x86, 0x18),
            mov_read(0x99, 0x08),
        ]))
        .build();
    let stats = index_of(&bytes).stats(2);
    assert_eq!(stats.unique_offsets, 3);
    assert_eq!(stats.total_entries, 5);
    assert_eq!(stats.top_offsets, vec![(0x18, 3), (0x08, 1)]);
}

#[test]
fn invalid_images_produce_an_empty_index() {
    let bytes = b"MZ not a real image, just some bytes that go on for a while.....".to_vec();
    let image = PeImage::parse(&bytes);
    assert!(!image.valid);
    let index = DisplacementIndex::build(&image, &bytes);
    assert_eq!(index.total_entries(), 0);
}

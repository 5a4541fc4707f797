use drift_core::drift::{compare, CandidateKind, DiffStatus, HierarchyDeltaCandidate};
use drift_core::model::{FieldDef, FunctionDef, LayoutSnapshot, StructDef};

fn hierarchy(version: &str, shift: u64, odd_shift: u64) -> LayoutSnapshot {
    LayoutSnapshot::new(
        version,
        vec![
            StructDef::new("Entity").with_field(FieldDef::new("id", 0x8 + shift)),
            StructDef::new("Actor")
                .with_base("Entity")
                .with_field(FieldDef::new("health", 0x10 + shift))
                .with_field(FieldDef::new("armor", 0x14 + shift)),
            StructDef::new("Player")
                .with_base("Actor")
                .with_field(FieldDef::new("level", 0x20 + shift))
                .with_field(FieldDef::new("gold", 0x28 + odd_shift)),
        ],
    )
}

#[test]
fn four_of_five_fields_agree_on_the_shift() {
    let report = compare(&hierarchy("1.0", 0, 0), &hierarchy("1.1", 8, 0x10));

    assert_eq!(report.old_version, "1.0");
    assert_eq!(report.count(DiffStatus::Modified), 3);
    assert_eq!(report.moved_fields().count(), 5);

    assert_eq!(report.candidates.len(), 1);
    let c = &report.candidates[0];
    assert_eq!(c.hierarchy, "Entity");
    assert_eq!(c.kind, CandidateKind::Field);
    assert_eq!(c.delta, 8);
    assert_eq!(c.label, "Entity: fields +0x8");
    assert_eq!(c.match_count, 4);
    assert_eq!(c.total_candidates, 5);
    assert!((c.confidence - 0.8).abs() < 1e-9);
    assert_eq!(c.anomalies.len(), 1);
    assert_eq!(c.anomalies[0].qualified(), "Player::gold");
    assert_eq!(c.anomalies[0].delta, 0x10);
    assert_eq!(
        c.affected_structs,
        vec!["Actor".to_string(), "Entity".to_string(), "Player".to_string()]
    );
    assert!(c.enabled);
}

#[test]
fn identical_snapshots_have_no_drift() {
    let report = compare(&hierarchy("1.0", 0, 0), &hierarchy("1.0", 0, 0));
    assert_eq!(report.count(DiffStatus::Unchanged), 3);
    assert!(report.candidates.is_empty());
    assert!(report.struct_diffs.iter().all(|d| d.fields.is_empty()));
}

#[test]
fn added_and_removed_structs_and_fields() {
    let old = LayoutSnapshot::new(
        "old",
        vec![
            StructDef::new("Gone"),
            StructDef::new("Item")
                .with_field(FieldDef::new("count", 0x8))
                .with_field(FieldDef::new("legacy", 0xC)),
        ],
    );
    let new = LayoutSnapshot::new(
        "new",
        vec![
            StructDef::new("Item")
                .with_field(FieldDef::new("count", 0x8).with_type("uint32_t", 4))
                .with_field(FieldDef::new("owner", 0x10)),
            StructDef::new("Fresh"),
        ],
    );
    let report = compare(&old, &new);

    let status = |name: &str| report.struct_diffs.iter().find(|d| d.name == name).map(|d| d.status);
    assert_eq!(status("Gone"), Some(DiffStatus::Removed));
    assert_eq!(status("Fresh"), Some(DiffStatus::Added));
    assert_eq!(status("Item"), Some(DiffStatus::Modified));

    let item = report.struct_diffs.iter().find(|d| d.name == "Item").expect("item");
    let field = |name: &str| item.fields.iter().find(|f| f.name == name).expect(name);
    assert_eq!(field("count").status, DiffStatus::Modified);
    assert_eq!(field("count").delta, Some(0));
    assert!(!field("count").moved());
    assert_eq!(field("count").new_type.as_deref(), Some("uint32_t"));
    assert_eq!(field("legacy").status, DiffStatus::Removed);
    assert_eq!(field("owner").status, DiffStatus::Added);
    assert_eq!(field("owner").old_offset, None);

    // Type-only changes and single moves do not produce candidates.
    assert!(report.candidates.is_empty());
}

#[test]
fn unnamed_fields_are_matched_by_offset_key() {
    let pad = |offset| FieldDef { name: None, offset, type_name: None, size: Some(4) };
    let old = LayoutSnapshot::new("a", vec![StructDef::new("S").with_field(pad(0x10))]);
    let new = LayoutSnapshot::new("b", vec![StructDef::new("S").with_field(pad(0x18))]);
    let report = compare(&old, &new);

    let diff = &report.struct_diffs[0];
    let names: Vec<(&str, DiffStatus)> =
        diff.fields.iter().map(|f| (f.name.as_str(), f.status)).collect();
    assert_eq!(
        names,
        vec![("field_0x10", DiffStatus::Removed), ("field_0x18", DiffStatus::Added)]
    );
}

#[test]
fn vtable_slot_shifts_become_their_own_candidate() {
    let old = LayoutSnapshot::new(
        "a",
        vec![StructDef::new("Widget")
            .with_vfunc("Draw", 2)
            .with_vfunc("Update", 3)
            .with_vfunc("Destroy", 4)
            .with_vfunc("Dtor", 0)],
    );
    let new = LayoutSnapshot::new(
        "b",
        vec![StructDef::new("Widget")
            .with_vfunc("Draw", 3)
            .with_vfunc("Update", 4)
            .with_vfunc("Destroy", 5)
            .with_vfunc("Dtor", 0)
            .with_vfunc("Resize", 2)],
    );
    let report = compare(&old, &new);

    assert_eq!(report.candidates.len(), 1);
    let c: &HierarchyDeltaCandidate = &report.candidates[0];
    assert_eq!(c.kind, CandidateKind::VtableSlot);
    assert_eq!(c.delta, 1);
    assert_eq!(c.match_count, 3);
    assert_eq!(c.label, "Widget: vtable slots +0x1");

    let widget = &report.struct_diffs[0];
    let added: Vec<_> =
        widget.vfuncs.iter().filter(|v| v.status == DiffStatus::Added).map(|v| &v.name).collect();
    assert_eq!(added, vec!["Resize"]);
}

#[test]
fn function_address_changes_mark_the_struct_modified() {
    let func = |address| FunctionDef { name: "Spawn".into(), address: Some(address) };
    let mut before = StructDef::new("World");
    before.functions.push(func(0x1400_1000));
    let mut after = StructDef::new("World");
    after.functions.push(func(0x1400_2000));

    let report = compare(
        &LayoutSnapshot::new("a", vec![before]),
        &LayoutSnapshot::new("b", vec![after]),
    );
    let diff = &report.struct_diffs[0];
    assert_eq!(diff.status, DiffStatus::Modified);
    assert_eq!(diff.functions[0].status, DiffStatus::Modified);
    assert_eq!(diff.functions[0].new_address, Some(0x1400_2000));
}

#[test]
fn separate_hierarchies_get_separate_candidates() {
    let make = |shift: u64| {
        LayoutSnapshot::new(
            "v",
            vec![
                StructDef::new("A")
                    .with_field(FieldDef::new("x", 0x8 + shift))
                    .with_field(FieldDef::new("y", 0x10 + shift)),
                StructDef::new("B")
                    .with_field(FieldDef::new("x", 0x8 + 2 * shift))
                    .with_field(FieldDef::new("y", 0x10 + 2 * shift)),
            ],
        )
    };
    let report = compare(&make(0), &make(4));
    let summary: Vec<(&str, i64)> =
        report.candidates.iter().map(|c| (c.hierarchy.as_str(), c.delta)).collect();
    assert_eq!(summary, vec![("A", 4), ("B", 8)]);

    assert_eq!(report.actionable(0.9).count(), 2);
    let mut disabled = report.clone();
    disabled.candidates[0].enabled = false;
    assert_eq!(disabled.actionable(0.0).count(), 1);
}

#[test]
fn reports_round_trip_through_json() {
    let report = compare(&hierarchy("1.0", 0, 0), &hierarchy("1.1", 8, 0x10));
    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["candidates"][0]["kind"], "field");
    assert_eq!(json["struct_diffs"][0]["status"], "modified");

    let mut value = json.clone();
    value["candidates"][0].as_object_mut().expect("object").remove("enabled");
    let parsed: drift_core::drift::DriftReport = serde_json::from_value(value).expect("parse");
    assert!(parsed.candidates[0].enabled);
}

#[test]
fn unmoved_fields_lower_hierarchy_confidence() {
    let make = |version: &str, shift: u64| {
        let mut entity = StructDef::new("Entity");
        for i in 0..8u64 {
            entity = entity.with_field(FieldDef::new(format!("flag{i}"), i * 4));
        }
        let actor = StructDef::new("Actor")
            .with_base("Entity")
            .with_field(FieldDef::new("health", 0x40 + shift))
            .with_field(FieldDef::new("armor", 0x48 + shift));
        LayoutSnapshot::new(version, vec![entity, actor])
    };
    let report = compare(&make("1.0", 0), &make("1.1", 8));

    assert_eq!(report.count(DiffStatus::Unchanged), 1);
    assert_eq!(report.candidates.len(), 1);
    let c = &report.candidates[0];
    assert_eq!(c.hierarchy, "Entity");
    assert_eq!(c.match_count, 2);
    assert_eq!(c.total_candidates, 10);
    assert!((c.confidence - 0.2).abs() < 1e-9);
    assert!(c.anomalies.is_empty());
    assert_eq!(report.actionable(0.5).count(), 0);
}

#[test]
fn huge_offsets_do_not_overflow() {
    let make = |offset: u64| {
        LayoutSnapshot::new("v", vec![StructDef::new("Blob").with_field(FieldDef::new("tail", offset))])
    };
    let report = compare(&make(0), &make(u64::MAX));
    let field = &report.struct_diffs[0].fields[0];
    assert_eq!(field.delta, Some(i64::MAX));
    assert!(report.candidates.is_empty());
}

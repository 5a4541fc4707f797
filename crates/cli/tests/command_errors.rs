use offset_drift::commands::{
    drift_command, extract_command, init_project_command, list_binaries_command, load_layout,
    project_info_command, resolve_binary, scan_command, signature_files_in, verify_command,
    ExtractArgs, ScanArgs, VerifyArgs,
};
use tempfile::tempdir;

fn extract_args(root: &str, binary: &str, layout: &str) -> ExtractArgs {
    ExtractArgs {
        root: root.to_string(),
        binary: binary.to_string(),
        layout: layout.to_string(),
        out: None,
        min_confidence: None,
        max_occurrences: None,
        context_bytes: None,
        no_rtti: false,
        binary_version: None,
        json: false,
    }
}

#[test]
fn list_binaries_errors_when_config_missing() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    let err = list_binaries_command(&root, false).unwrap_err();
    assert!(err.to_string().contains("Failed to read project config"), "unexpected error: {err}");
}

#[test]
fn scan_errors_when_db_path_is_unusable() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("ErrScan".into())).unwrap();
    let layout = drift_core::db::ProjectLayout::new(&root);
    let mut cfg: drift_core::db::ProjectConfig =
        serde_json::from_str(&std::fs::read_to_string(&layout.project_config_path).unwrap())
            .unwrap();
    cfg.db.path = ".drift/project.json/bad.db".into();
    std::fs::write(&layout.project_config_path, serde_json::to_string_pretty(&cfg).unwrap())
        .unwrap();
    let err = scan_command(ScanArgs {
        root,
        binary: "Game.exe".into(),
        signatures: Vec::new(),
        json: false,
    })
    .unwrap_err();
    assert!(err.to_string().contains("Failed to open project database"), "unexpected error: {err}");
}

#[test]
fn project_info_errors_when_config_corrupt() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("CorruptProj".into())).unwrap();
    let layout = drift_core::db::ProjectLayout::new(&root);
    std::fs::write(&layout.project_config_path, "not-json").unwrap();
    let err = project_info_command(&root, true).unwrap_err();
    assert!(err.to_string().contains("Failed to parse project config JSON"));
}

#[test]
fn extract_errors_for_unknown_binary() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("Extract".into())).unwrap();
    let err = extract_command(extract_args(&root, "ghost.exe", "layouts/v1.json")).unwrap_err();
    assert!(err.to_string().contains("Unknown binary 'ghost.exe'"), "unexpected error: {err}");
}

#[test]
fn extract_errors_for_missing_layout() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("Extract".into())).unwrap();
    std::fs::write(temp.path().join("Game.exe"), b"MZ").unwrap();
    let err = extract_command(extract_args(&root, "Game.exe", "layouts/none.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read layout snapshot"), "unexpected error: {err}");
}

#[test]
fn extract_errors_for_non_pe_binary() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("Extract".into())).unwrap();
    std::fs::write(temp.path().join("Game.exe"), b"MZ").unwrap();
    std::fs::write(temp.path().join("layouts/v1.json"), r#"{ "version": "v1", "structs": [] }"#)
        .unwrap();
    let err = extract_command(extract_args(&root, "Game.exe", "layouts/v1.json")).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("is not a valid PE image"), "unexpected error: {chain}");
}

#[test]
fn resolve_binary_prefers_registered_names() {
    let temp = tempdir().unwrap();
    let root = temp.path().to_string_lossy().to_string();
    init_project_command(&root, Some("Resolve".into())).unwrap();
    let ctx = drift_core::db::ProjectContext::from_root(temp.path()).unwrap();
    ctx.db
        .insert_binary(&drift_core::db::BinaryRecord::new("live", "builds/Game.exe"))
        .unwrap();

    let (name, path) = resolve_binary(&ctx, "live").unwrap();
    assert_eq!(name, "live");
    assert_eq!(path, temp.path().join("builds/Game.exe"));

    std::fs::write(temp.path().join("Other.exe"), b"x").unwrap();
    let (name, _) = resolve_binary(&ctx, "Other.exe").unwrap();
    assert_eq!(name, "Other.exe");
}

#[test]
fn layouts_load_from_yaml_and_json() {
    let temp = tempdir().unwrap();
    let yaml = temp.path().join("v1.yml");
    std::fs::write(&yaml, "version: v1\nstructs:\n  - name: Foo\n").unwrap();
    assert_eq!(load_layout(&yaml).unwrap().structs[0].name, "Foo");

    let json = temp.path().join("v1.json");
    std::fs::write(&json, "version: v1").unwrap();
    let err = load_layout(&json).unwrap_err();
    assert!(err.to_string().contains("Failed to parse JSON layout"));
}

#[test]
fn signature_files_are_sorted_json_only() {
    let temp = tempdir().unwrap();
    assert!(signature_files_in(&temp.path().join("missing")).unwrap().is_empty());

    for name in ["b.json", "a.json", "notes.txt"] {
        std::fs::write(temp.path().join(name), "[]").unwrap();
    }
    let files = signature_files_in(temp.path()).unwrap();
    let names: Vec<_> =
        files.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
    assert_eq!(names, vec!["a.json", "b.json"]);
}

#[test]
fn drift_errors_for_missing_snapshot() {
    let temp = tempdir().unwrap();
    let missing = temp.path().join("nope.json").to_string_lossy().to_string();
    let err = drift_command(&missing, &missing, 0.0, false).unwrap_err();
    assert!(err.to_string().contains("Failed to read layout snapshot"));
}

#[test]
fn verify_errors_for_unreadable_scan_report() {
    let temp = tempdir().unwrap();
    let layout = temp.path().join("v1.json");
    std::fs::write(&layout, r#"{ "version": "v1" }"#).unwrap();
    let report = temp.path().join("scan.json");
    std::fs::write(&report, "{}").unwrap();

    let err = verify_command(VerifyArgs {
        layout: layout.to_string_lossy().to_string(),
        signatures: Vec::new(),
        scan_report: Some(report.to_string_lossy().to_string()),
        json: false,
    })
    .unwrap_err();
    assert!(err.to_string().contains("Failed to parse scan report"));
}

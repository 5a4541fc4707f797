use drift_core::db::{
    save_project_config, ProjectConfig, ProjectContext, ProjectLayout, ScanSettings,
};
use drift_core::scanner::ExtractOptions;

#[test]
fn project_context_loads_config_and_db() {
    let temp = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(temp.path());

    let config = ProjectConfig::new("CtxProject", layout.db_path_relative_string());
    save_project_config(&layout, &config).expect("save config");

    let ctx = ProjectContext::from_root(temp.path()).expect("context");
    assert_eq!(ctx.config.name, "CtxProject");
    assert!(ctx.db_path.is_file());
    assert_eq!(ctx.config.scan, ScanSettings::default());

    // DB should be initialized and usable.
    ctx.db.list_binaries().expect("list binaries");

    assert_eq!(ctx.resolve("layouts/v1.json"), temp.path().join("layouts/v1.json"));
    let absolute = temp.path().join("elsewhere.exe");
    assert_eq!(ctx.resolve(&absolute), absolute);
}

#[test]
fn scan_settings_default_when_absent_from_config() {
    let json = r#"{
        "name": "Old",
        "description": null,
        "config_version": "0.1.0",
        "db": { "path": ".drift/project.db" }
    }"#;
    let config: ProjectConfig = serde_json::from_str(json).expect("parse");
    assert_eq!(config.scan.extract_options(), ExtractOptions::default());

    let tuned = ScanSettings { min_confidence: 80, max_occurrences: 3, context_bytes: 0 };
    let options = tuned.extract_options();
    assert_eq!(options.min_confidence, 80);
    assert_eq!(options.max_occurrences, 3);
    assert!(options.include_rtti);
}

#[test]
fn layout_paths_live_under_the_root() {
    let root = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(root.path());

    assert!(layout.db_path_relative_string().starts_with(".drift"));
    assert!(layout.signature_path("Player").ends_with("signatures/Player.json"));
    assert!(layout.signature_path("game::Actor<int>").ends_with("signatures/game__Actor_int_.json"));
    assert!(layout.scan_report_path("Game 1.2.exe").ends_with("reports/scan-Game_1.2.exe.json"));
}

use std::fs;

use crate::commands::{open_project_db, print_dir_status, print_json, signature_files_in};
use crate::{canonicalize_or_current, infer_project_name};
use anyhow::{Context, Result};
use drift_core::db::{BinaryRecord, ProjectConfig, ProjectDb, ProjectLayout, ScanSettings};
use serde::Serialize;

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub scan: ScanSettings,
    pub layout: ProjectInfoLayout,
    pub binaries: Vec<BinaryRecord>,
    pub signature_files: usize,
    pub scan_runs: usize,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub signatures_dir: String,
    pub reports_dir: String,
    pub layouts_dir: String,
}

/// Initialize a new project at `root`.
pub fn init_project_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    for (label, dir) in [
        ("meta dir", &layout.meta_dir),
        ("signatures dir", &layout.signatures_dir),
        ("reports dir", &layout.reports_dir),
        ("layouts dir", &layout.layouts_dir),
    ] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {label}: {}", dir.display()))?;
    }

    let config = ProjectConfig::new(&project_name, layout.db_path_relative_string());
    drift_core::db::save_project_config(&layout, &config)?;

    // Create the database now so follow-on commands can rely on it.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize project database at {}", layout.db_path.display())
    })?;

    println!("Initialized drift project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Signatures dir: {}", layout.signatures_dir.display());
    println!("  Reports dir: {}", layout.reports_dir.display());
    println!("  Layouts dir: {}", layout.layouts_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (config, _db_path, db) = open_project_db(&layout)?;
    let binaries = db.list_binaries().context("Failed to list binaries")?;
    let scan_runs = db.list_scan_runs(None).context("Failed to list scan runs")?;
    let signature_files = signature_files_in(&layout.signatures_dir)?;

    if json {
        let snapshot = ProjectInfoSnapshot {
            name: config.name.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            scan: config.scan,
            layout: ProjectInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                signatures_dir: layout.signatures_dir.display().to_string(),
                reports_dir: layout.reports_dir.display().to_string(),
                layouts_dir: layout.layouts_dir.display().to_string(),
            },
            binaries,
            signature_files: signature_files.len(),
            scan_runs: scan_runs.len(),
        };
        return print_json(&snapshot);
    }

    println!("Drift Project Info");
    println!("==================");
    println!("Name: {}", config.name);
    if let Some(desc) = &config.description {
        println!("Description: {}", desc);
    }
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    println!(
        "Scan defaults: min_confidence={} max_occurrences={} context_bytes={}",
        config.scan.min_confidence, config.scan.max_occurrences, config.scan.context_bytes
    );
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.drift)", &layout.meta_dir);
    print_dir_status("Signatures dir", &layout.signatures_dir);
    print_dir_status("Reports dir", &layout.reports_dir);
    print_dir_status("Layouts dir", &layout.layouts_dir);
    println!();
    println!("Binaries: {}", binaries.len());
    println!("Signature files: {}", signature_files.len());
    println!("Scan runs: {}", scan_runs.len());

    Ok(())
}

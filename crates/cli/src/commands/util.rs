use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use drift_core::db::{ProjectConfig, ProjectContext, ProjectDb, ProjectLayout};
use drift_core::model::LayoutSnapshot;
use serde::Serialize;

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Clean,
    /// Incomplete coverage or error-severity findings; exit status 2.
    NeedsAttention,
}

impl CommandOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            CommandOutcome::Clean => ExitCode::SUCCESS,
            CommandOutcome::NeedsAttention => ExitCode::from(2),
        }
    }
}

/// Resolve the DB path (respecting relative/absolute config) and open a ProjectDb (delegates to core helper).
pub fn open_project_db(layout: &ProjectLayout) -> Result<(ProjectConfig, PathBuf, ProjectDb)> {
    drift_core::db::open_project_db(layout)
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Load a layout snapshot; `.yaml`/`.yml` files are read as YAML, anything else as JSON.
pub fn load_layout(path: &Path) -> Result<LayoutSnapshot> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read layout snapshot {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let snapshot = if matches!(ext, "yaml" | "yml") {
        serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse YAML layout {}", path.display()))?
    } else {
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse JSON layout {}", path.display()))?
    };
    Ok(snapshot)
}

/// Resolve `binary` as a registered binary name first, then as a path.
pub fn resolve_binary(ctx: &ProjectContext, binary: &str) -> Result<(String, PathBuf)> {
    if let Some(record) = ctx.db.find_binary(binary).context("Failed to look up binary")? {
        return Ok((record.name, ctx.resolve(&record.path)));
    }
    let path = ctx.resolve(binary);
    if !path.is_file() {
        return Err(anyhow!(
            "Unknown binary '{binary}': not registered and no file at {}",
            path.display()
        ));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.to_string());
    Ok((name, path))
}

/// Every `*.json` file directly under `dir`, sorted by name.
pub fn signature_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Pretty-print `value` as JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    println!("{}", serialized);
    Ok(())
}

use std::path::Path;

use crate::commands::{open_project_db, print_json};
use crate::canonicalize_or_current;
use anyhow::{anyhow, bail, Context, Result};
use drift_core::db::{BinaryRecord, ProjectLayout};
use drift_core::scanner::BinaryScanner;

/// Register a binary in the project database.
pub fn add_binary_command(
    root: &str,
    path: &str,
    name: Option<String>,
    arch: Option<String>,
    hash: Option<String>,
    skip_hash: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (_config, db_path, db) = open_project_db(&layout)?;

    let input_path = Path::new(path);
    let abs_path = if input_path.is_absolute() {
        input_path.to_path_buf()
    } else {
        root_path.join(input_path)
    };

    if !abs_path.exists() {
        return Err(anyhow!("Binary file does not exist: {}", abs_path.display()));
    }

    // Store path relative to project root when possible.
    let rel_path = abs_path
        .canonicalize()
        .ok()
        .and_then(|abs_canon| {
            root_path.canonicalize().ok().and_then(|root_canon| {
                abs_canon.strip_prefix(&root_canon).ok().map(|p| p.to_path_buf())
            })
        })
        .or_else(|| abs_path.strip_prefix(&root_path).ok().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| abs_path.clone());
    let rel_path_str = rel_path.to_string_lossy().to_string();

    let binary_name = name.unwrap_or_else(|| {
        input_path.file_name().and_then(|os| os.to_str()).unwrap_or(path).to_string()
    });

    // One read serves both arch inference and hashing.
    let scanner = if arch.is_none() || (hash.is_none() && !skip_hash) {
        Some(
            BinaryScanner::from_path(&abs_path)
                .with_context(|| format!("Failed to read binary {}", abs_path.display()))?,
        )
    } else {
        None
    };
    let arch = arch.or_else(|| {
        scanner.as_ref().and_then(|s| s.image().arch_name()).map(str::to_string)
    });
    let hash = match hash {
        Some(h) => Some(h),
        None if skip_hash => None,
        None => scanner.as_ref().map(|s| s.binary_hash().to_string()),
    };

    let record = BinaryRecord { name: binary_name, path: rel_path_str, arch, hash };

    let id = db.insert_binary(&record).context("Failed to insert binary record")?;

    println!("Added binary:");
    println!("  Id: {}", id);
    println!("  Name: {}", record.name);
    println!("  Path (relative): {}", record.path);
    println!("  Arch: {}", record.arch.as_deref().unwrap_or("(unknown)"));
    println!("  DB: {}", db_path.display());

    Ok(())
}

/// List all binaries registered in the project database.
pub fn list_binaries_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (_config, _db_path, db) = open_project_db(&layout)?;
    let binaries = db.list_binaries().context("Failed to list binaries")?;

    if json {
        return print_json(&binaries);
    }

    println!("Binaries:");
    if binaries.is_empty() {
        println!("(none)");
        return Ok(());
    }

    for bin in binaries {
        let arch_display = bin.arch.as_deref().unwrap_or("(unspecified)");
        let hash_display = bin.hash.as_deref().unwrap_or("(none)");
        println!(
            "- {} (path: {}, arch: {}, hash: {})",
            bin.name, bin.path, arch_display, hash_display
        );
    }

    Ok(())
}

/// Print PE headers and the section table. Invalid images are reported, then
/// the command fails.
pub fn pe_info_command(path: &str, json: bool) -> Result<()> {
    let scanner = BinaryScanner::from_path(path)?;
    let summary = scanner.pe_summary();

    if json {
        print_json(&summary)?;
    } else {
        println!("PE Info: {}", summary.identifier);
        println!("  Size: {} bytes", summary.size);
        println!("  SHA-256: {}", summary.binary_hash);
        println!("  Valid: {}", summary.image.valid);
        if summary.image.valid {
            let image = &summary.image;
            println!("  Format: {}", if image.is_64bit { "PE32+" } else { "PE32" });
            println!(
                "  Machine: {:#06x} ({})",
                image.machine,
                image.arch_name().unwrap_or("unknown")
            );
            println!("  Image base: {:#x}", image.image_base);
            println!("  Entry point RVA: {:#x}", image.entry_point_rva);
            println!("  Sections ({}):", image.sections.len());
            for s in &image.sections {
                println!(
                    "  - {:<8} va={:#010x} vsize={:#x} raw={:#x} rsize={:#x} flags={:#010x}{}",
                    s.name,
                    s.virtual_address,
                    s.virtual_size,
                    s.raw_address,
                    s.raw_size,
                    s.characteristics,
                    if s.is_executable() { " [exec]" } else { "" }
                );
            }
        }
    }

    if let Some(err) = &summary.image.error {
        bail!("{} is not a valid PE image: {}", summary.identifier, err);
    }
    Ok(())
}

/// Build the displacement index and print its statistics.
pub fn index_stats_command(path: &str, top: usize, json: bool) -> Result<()> {
    let scanner = BinaryScanner::from_path(path)?;
    let stats = scanner.index_stats(top)?;

    if json {
        return print_json(&stats);
    }

    println!("Displacement index: {}", scanner.identifier());
    println!("  Unique offsets: {}", stats.unique_offsets);
    println!("  Total entries: {}", stats.total_entries);
    if !stats.top_offsets.is_empty() {
        println!("  Most referenced:");
        for (disp, count) in &stats.top_offsets {
            println!("  - {:#x}: {}", disp, count);
        }
    }
    Ok(())
}

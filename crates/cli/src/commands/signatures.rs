use std::path::PathBuf;

use crate::canonicalize_or_current;
use crate::commands::{
    load_layout, print_json, resolve_binary, signature_files_in, write_json_file, CommandOutcome,
};
use anyhow::{bail, Context, Result};
use drift_core::db::{ProjectContext, ScanRunRecord};
use drift_core::scanner::{BinaryScanner, Extraction, ScanResult};
use drift_core::signature::{load_signatures, save_signatures};
use serde::Serialize;

#[derive(Debug)]
pub struct ExtractArgs {
    pub root: String,
    pub binary: String,
    pub layout: String,
    pub out: Option<String>,
    pub min_confidence: Option<u8>,
    pub max_occurrences: Option<usize>,
    pub context_bytes: Option<usize>,
    pub no_rtti: bool,
    pub binary_version: Option<String>,
    pub json: bool,
}

#[derive(Debug)]
pub struct ScanArgs {
    pub root: String,
    pub binary: String,
    pub signatures: Vec<String>,
    pub json: bool,
}

#[derive(Serialize)]
struct ExtractReport<'a> {
    binary: &'a str,
    binary_hash: &'a str,
    written: Vec<String>,
    #[serde(flatten)]
    extraction: &'a Extraction,
}

/// Extract signatures for every field of a layout snapshot.
pub fn extract_command(args: ExtractArgs) -> Result<()> {
    let root_path = canonicalize_or_current(&args.root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let (binary_name, binary_path) = resolve_binary(&ctx, &args.binary)?;
    let snapshot = load_layout(&ctx.resolve(&args.layout))?;

    let mut options = ctx.config.scan.extract_options();
    if let Some(v) = args.min_confidence {
        options.min_confidence = v;
    }
    if let Some(v) = args.max_occurrences {
        options.max_occurrences = v;
    }
    if let Some(v) = args.context_bytes {
        options.context_bytes = v;
    }
    options.include_rtti = !args.no_rtti;
    options.binary_version = args.binary_version;

    let scanner = BinaryScanner::from_path(&binary_path)?;
    let extraction = scanner
        .extract(&snapshot.declared_fields(), &options)
        .with_context(|| format!("Failed to extract signatures from {binary_name}"))?;

    let written: Vec<PathBuf> = match &args.out {
        Some(out) => {
            let path = ctx.resolve(out);
            save_signatures(&path, &extraction.sets)
                .with_context(|| format!("Failed to write signatures to {}", path.display()))?;
            vec![path]
        }
        None => {
            let mut paths = Vec::new();
            for set in &extraction.sets {
                let path = ctx.layout.signature_path(&set.struct_name);
                write_json_file(&path, set)?;
                paths.push(path);
            }
            paths
        }
    };

    if args.json {
        return print_json(&ExtractReport {
            binary: &binary_name,
            binary_hash: scanner.binary_hash(),
            written: written.iter().map(|p| p.display().to_string()).collect(),
            extraction: &extraction,
        });
    }

    let summary = &extraction.summary;
    println!("Extracted signatures:");
    println!("  Binary: {} ({})", binary_name, scanner.binary_hash());
    println!("  Layout version: {}", snapshot.version);
    println!("  Fields attempted: {}", summary.attempted);
    println!("  Fields covered: {}", summary.covered);
    println!("  No reference found: {}", summary.absent);
    println!("  Too ambiguous: {}", summary.ambiguous);
    println!("  Below confidence threshold: {}", summary.below_threshold);
    println!("  RTTI anchors: {}", summary.rtti_anchors);
    println!("  Signatures: {}", extraction.signature_count());
    for path in &written {
        println!("  Wrote: {}", path.display());
    }
    Ok(())
}

/// Scan a binary with previously extracted signatures.
pub fn scan_command(args: ScanArgs) -> Result<CommandOutcome> {
    let root_path = canonicalize_or_current(&args.root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let (binary_name, binary_path) = resolve_binary(&ctx, &args.binary)?;

    let files: Vec<PathBuf> = if args.signatures.is_empty() {
        signature_files_in(&ctx.layout.signatures_dir)?
    } else {
        args.signatures.iter().map(|s| ctx.resolve(s)).collect()
    };
    if files.is_empty() {
        bail!("No signature files found in {}", ctx.layout.signatures_dir.display());
    }

    let mut sets = Vec::new();
    for file in &files {
        let loaded = load_signatures(file)
            .with_context(|| format!("Failed to load signatures from {}", file.display()))?;
        sets.extend(loaded);
    }

    let scanner = BinaryScanner::from_path(&binary_path)?;
    let result = scanner.scan(&sets).with_context(|| format!("Failed to scan {binary_name}"))?;

    let report_path = ctx.layout.scan_report_path(&binary_name);
    write_json_file(&report_path, &result)?;
    ctx.db
        .insert_scan_run(&ScanRunRecord::from_scan(&binary_name, &result))
        .context("Failed to record scan run")?;

    if args.json {
        print_json(&result)?;
    } else {
        print_scan(&result);
        println!("Report: {}", report_path.display());
    }

    Ok(if result.is_complete() { CommandOutcome::Clean } else { CommandOutcome::NeedsAttention })
}

fn print_scan(result: &ScanResult) {
    println!("Scan of {}:", result.binary_identifier);
    println!("  SHA-256: {}", result.binary_hash);
    println!(
        "  Signatures: {} matched, {} missing, {} total",
        result.signatures_matched, result.signatures_missing, result.signatures_total
    );

    if result.changes.is_empty() {
        println!("Changes: (none)");
    } else {
        println!("Changes:");
        for change in &result.changes {
            println!(
                "- {}::{} {:#x} -> {:#x} (confidence {}){}",
                change.struct_name,
                change.field_name,
                change.declared_offset,
                change.observed_offset,
                change.confidence,
                change.cluster_label.as_deref().map(|l| format!(" [{l}]")).unwrap_or_default()
            );
            if !change.conflicting_offsets.is_empty() {
                let others: Vec<String> =
                    change.conflicting_offsets.iter().map(|o| format!("{o:#x}")).collect();
                println!("    other signatures observed: {}", others.join(", "));
            }
        }
    }

    if !result.pattern_groups.is_empty() {
        println!("Patterns:");
        for p in &result.pattern_groups {
            println!(
                "- {}: {} field(s) in {} ({:.0}%) - {}",
                p.label,
                p.match_count,
                p.affected_structs.join(", "),
                p.confidence * 100.0,
                p.likely_cause
            );
            for anomaly in &p.anomalies {
                println!("    anomaly: {}", anomaly);
            }
        }
    }

    let missing: Vec<_> = result.missing().collect();
    if !missing.is_empty() {
        println!("Missing (pattern no longer present):");
        for m in missing {
            println!("- {}::{} [{}]", m.struct_name, m.field_name, m.kind.as_str());
        }
    }
}

/// List recorded scan runs.
pub fn list_scans_command(root: &str, binary: Option<String>, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = ProjectContext::from_root(&root_path)?;
    let runs = ctx.db.list_scan_runs(binary.as_deref()).context("Failed to list scan runs")?;

    if json {
        return print_json(&runs);
    }

    println!("Scan runs:");
    if runs.is_empty() {
        println!("(none)");
        return Ok(());
    }
    for run in runs {
        println!(
            "- {} at {}: {}/{} matched, {} missing, {} change(s), {} pattern(s)",
            run.binary,
            run.scanned_at,
            run.matched,
            run.signatures_total,
            run.missing,
            run.changes,
            run.patterns
        );
    }
    Ok(())
}

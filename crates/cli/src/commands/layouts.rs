use std::fs;
use std::path::Path;

use crate::commands::{load_layout, print_json, CommandOutcome};
use anyhow::{bail, Context, Result};
use drift_core::cluster::format_delta;
use drift_core::drift::{compare, DiffStatus, DriftReport};
use drift_core::scanner::ScanResult;
use drift_core::signature::load_signatures;
use drift_core::verify::{verify, Observation, Severity, VerificationReport};

#[derive(Debug)]
pub struct VerifyArgs {
    pub layout: String,
    pub signatures: Vec<String>,
    pub scan_report: Option<String>,
    pub json: bool,
}

/// Compare two layout snapshots.
pub fn drift_command(old: &str, new: &str, min_confidence: f64, json: bool) -> Result<()> {
    let old_snapshot = load_layout(Path::new(old))?;
    let new_snapshot = load_layout(Path::new(new))?;
    let mut report = compare(&old_snapshot, &new_snapshot);
    report.candidates.retain(|c| c.confidence >= min_confidence);

    if json {
        return print_json(&report);
    }
    print_drift(&report);
    Ok(())
}

fn print_drift(report: &DriftReport) {
    println!("Layout drift {} -> {}:", report.old_version, report.new_version);
    println!(
        "  Structs: {} modified, {} added, {} removed, {} unchanged",
        report.count(DiffStatus::Modified),
        report.count(DiffStatus::Added),
        report.count(DiffStatus::Removed),
        report.count(DiffStatus::Unchanged)
    );

    for diff in report.struct_diffs.iter().filter(|d| d.status != DiffStatus::Unchanged) {
        println!("- {} [{}]", diff.name, diff.status.as_str());
        for field in diff.fields.iter().filter(|f| f.status != DiffStatus::Unchanged) {
            match (field.old_offset, field.new_offset, field.delta) {
                (Some(o), Some(n), Some(d)) if d != 0 => {
                    println!("    {} {:#x} -> {:#x} ({})", field.name, o, n, format_delta(d))
                }
                _ => println!("    {} [{}]", field.name, field.status.as_str()),
            }
        }
        for slot in diff.vfuncs.iter().filter(|v| v.status != DiffStatus::Unchanged) {
            println!("    vfunc {} [{}]", slot.name, slot.status.as_str());
        }
    }

    if report.candidates.is_empty() {
        println!("Shift candidates: (none)");
        return;
    }
    println!("Shift candidates:");
    for c in &report.candidates {
        println!(
            "- {}: {}/{} compared member(s) agree ({:.0}%)",
            c.label,
            c.match_count,
            c.total_candidates,
            c.confidence * 100.0
        );
        for anomaly in &c.anomalies {
            println!("    anomaly: {} ({})", anomaly.qualified(), format_delta(anomaly.delta));
        }
    }
}

/// Cross-check a layout against signature or scan evidence.
pub fn verify_command(args: VerifyArgs) -> Result<CommandOutcome> {
    if args.signatures.is_empty() && args.scan_report.is_none() {
        bail!("verify needs --signatures or --scan-report");
    }
    let layout = load_layout(Path::new(&args.layout))?;

    let mut observations = Vec::new();
    for file in &args.signatures {
        let sets = load_signatures(file)
            .with_context(|| format!("Failed to load signatures from {file}"))?;
        observations.extend(Observation::from_signatures(&sets));
    }
    if let Some(report_path) = &args.scan_report {
        let body = fs::read_to_string(report_path)
            .with_context(|| format!("Failed to read scan report {report_path}"))?;
        let result: ScanResult = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse scan report {report_path}"))?;
        observations.extend(Observation::from_scan(&result));
    }

    let report = verify(&layout, &observations);
    if args.json {
        print_json(&report)?;
    } else {
        print_verification(&report);
    }

    Ok(if report.has_errors() { CommandOutcome::NeedsAttention } else { CommandOutcome::Clean })
}

fn print_verification(report: &VerificationReport) {
    println!("Verification of layout {}:", report.layout_version);
    println!("  Observations checked: {}", report.checked);
    println!("  Agreeing: {}", report.matched);
    println!(
        "  Coverage: {}/{} declared fields ({:.0}%)",
        report.coverage.observed_fields,
        report.coverage.declared_fields,
        report.coverage.ratio * 100.0
    );
    println!(
        "  Issues: {} error(s), {} warning(s), {} info",
        report.count(Severity::Error),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );

    for issue in report.issues.iter().filter(|i| i.severity != Severity::Info) {
        let level = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        println!("- [{}] {}", level, issue.message);
    }

    if !report.patch_suggestions.is_empty() {
        println!("Patch suggestions:");
        for p in &report.patch_suggestions {
            println!(
                "- {}::{} {:#x} -> {:#x} (confidence {})",
                p.struct_name, p.field_name, p.current_offset, p.suggested_offset, p.confidence
            );
        }
    }
    if !report.manual_review.is_empty() {
        println!("Manual review (low confidence):");
        for p in &report.manual_review {
            println!(
                "- {}::{} {:#x} -> {:#x} (confidence {})",
                p.struct_name, p.field_name, p.current_offset, p.suggested_offset, p.confidence
            );
        }
    }
    for shift in &report.bulk_shifts {
        println!(
            "Bulk shift {}: {}/{} mismatch(es) agree ({:.0}%)",
            shift.label,
            shift.match_count,
            shift.total_candidates,
            shift.confidence * 100.0
        );
    }
}

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use offset_drift::commands::{
    add_binary_command, drift_command, extract_command, index_stats_command, init_project_command,
    list_binaries_command, list_scans_command, pe_info_command, project_info_command, scan_command,
    verify_command, CommandOutcome, ExtractArgs, ScanArgs, VerifyArgs,
};
use tracing_subscriber::EnvFilter;

/// Struct-offset drift detection for recompiled PE binaries.
///
/// This CLI is a thin wrapper around `drift-core` (exposed in code as `drift_core`).
/// All substantive logic lives in the library.
#[derive(Parser, Debug)]
#[command(
    name = "offset-drift",
    version,
    about = "Detect struct-offset drift between builds of a PE binary",
    long_about = None
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a project: `.drift/` metadata, `signatures/`, `reports/`, `layouts/`.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show project configuration, directories, and registered binaries.
    ProjectInfo {
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Register a binary in the project database.
    AddBinary {
        #[arg(long, default_value = ".")]
        root: String,

        /// Path to the binary to register.
        #[arg(long)]
        path: String,

        /// Optional human-friendly name. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Architecture label. Inferred from the PE header when omitted.
        #[arg(long)]
        arch: Option<String>,

        /// Optional precomputed hash. If omitted, SHA-256 is computed unless `--skip-hash` is set.
        #[arg(long)]
        hash: Option<String>,

        /// Skip hash computation (stores no hash).
        #[arg(long, default_value_t = false)]
        skip_hash: bool,
    },

    /// List all binaries registered in the project database.
    ListBinaries {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the PE headers and section table of a binary.
    PeInfo {
        /// Path to the binary.
        #[arg(long)]
        path: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Build the displacement index of a binary and print its statistics.
    IndexStats {
        #[arg(long)]
        path: String,

        /// Number of most-referenced displacements to show.
        #[arg(long, default_value_t = 20)]
        top: usize,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Extract field signatures for a layout snapshot from a binary.
    Extract {
        #[arg(long, default_value = ".")]
        root: String,

        /// Registered binary name, or a path to the binary.
        #[arg(long)]
        binary: String,

        /// Layout snapshot (JSON or YAML).
        #[arg(long)]
        layout: String,

        /// Write one combined signature file instead of one file per struct.
        #[arg(long)]
        out: Option<String>,

        /// Minimum confidence for a signature to be kept (project default if omitted).
        #[arg(long)]
        min_confidence: Option<u8>,

        /// Maximum candidate sites per field (project default if omitted).
        #[arg(long)]
        max_occurrences: Option<usize>,

        /// Context bytes captured around each instruction (project default if omitted).
        #[arg(long)]
        context_bytes: Option<usize>,

        /// Skip RTTI vtable anchors.
        #[arg(long, default_value_t = false)]
        no_rtti: bool,

        /// Version label stamped into the signature files.
        #[arg(long)]
        binary_version: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Match signatures against a (rebuilt) binary and report offset changes.
    ///
    /// Exits with status 2 when some signatures were not found.
    Scan {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        binary: String,

        /// Signature files to load. Defaults to every file under `signatures/`.
        #[arg(long = "signatures")]
        signatures: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded scan runs.
    ListScans {
        #[arg(long, default_value = ".")]
        root: String,

        /// Only show runs for this binary.
        #[arg(long)]
        binary: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compare two layout snapshots and propose per-hierarchy shifts.
    Drift {
        /// Older layout snapshot (JSON or YAML).
        #[arg(long)]
        old: String,

        /// Newer layout snapshot (JSON or YAML).
        #[arg(long)]
        new: String,

        /// Only list candidates at or above this confidence (0.0 - 1.0).
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Cross-check a layout snapshot against signature or scan evidence.
    ///
    /// Exits with status 2 when error-severity issues are found.
    Verify {
        /// Layout snapshot (JSON or YAML).
        #[arg(long)]
        layout: String,

        /// Extracted signature files.
        #[arg(long = "signatures")]
        signatures: Vec<String>,

        /// A JSON scan report written by `scan`.
        #[arg(long)]
        scan_report: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run(command: Command) -> Result<CommandOutcome> {
    match command {
        Command::InitProject { root, name } => init_project_command(&root, name)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::AddBinary { root, path, name, arch, hash, skip_hash } => {
            add_binary_command(&root, &path, name, arch, hash, skip_hash)?
        }
        Command::ListBinaries { root, json } => list_binaries_command(&root, json)?,
        Command::PeInfo { path, json } => pe_info_command(&path, json)?,
        Command::IndexStats { path, top, json } => index_stats_command(&path, top, json)?,
        Command::Extract {
            root,
            binary,
            layout,
            out,
            min_confidence,
            max_occurrences,
            context_bytes,
            no_rtti,
            binary_version,
            json,
        } => extract_command(ExtractArgs {
            root,
            binary,
            layout,
            out,
            min_confidence,
            max_occurrences,
            context_bytes,
            no_rtti,
            binary_version,
            json,
        })?,
        Command::Scan { root, binary, signatures, json } => {
            return scan_command(ScanArgs { root, binary, signatures, json });
        }
        Command::ListScans { root, binary, json } => list_scans_command(&root, binary, json)?,
        Command::Drift { old, new, min_confidence, json } => {
            drift_command(&old, &new, min_confidence, json)?
        }
        Command::Verify { layout, signatures, scan_report, json } => {
            return verify_command(VerifyArgs { layout, signatures, scan_report, json });
        }
    }
    Ok(CommandOutcome::Clean)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

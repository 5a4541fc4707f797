use std::path::{Path, PathBuf};

/// Logical layout of a project on disk.
///
/// Derived from a chosen root path. It does *not* perform any IO itself; the
/// CLI creates directories and files based on it.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub root: PathBuf,
    /// Internal metadata (`.drift`).
    pub meta_dir: PathBuf,
    pub project_config_path: PathBuf,
    pub db_path: PathBuf,
    /// Extracted signature collections, one JSON file per struct.
    pub signatures_dir: PathBuf,
    /// Scan, drift and verification reports.
    pub reports_dir: PathBuf,
    /// Declared layout snapshots (JSON or YAML).
    pub layouts_dir: PathBuf,
}

impl ProjectLayout {
    /// Compute the default layout for a project rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".drift");
        let project_config_path = meta_dir.join("project.json");
        let db_path = meta_dir.join("project.db");
        let signatures_dir = root.join("signatures");
        let reports_dir = root.join("reports");
        let layouts_dir = root.join("layouts");

        Self {
            root,
            meta_dir,
            project_config_path,
            db_path,
            signatures_dir,
            reports_dir,
            layouts_dir,
        }
    }

    /// Database path as stored in `ProjectConfig`, relative to `root` when possible.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    pub fn signature_path(&self, struct_name: &str) -> PathBuf {
        self.signatures_dir.join(format!("{}.json", sanitize_file_stem(struct_name)))
    }

    /// Where the JSON report of a scan of `binary_name` is written.
    pub fn scan_report_path(&self, binary_name: &str) -> PathBuf {
        self.reports_dir.join(format!("scan-{}.json", sanitize_file_stem(binary_name)))
    }
}

/// Struct names may carry namespaces (`ns::Foo`) or templates.
fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

//! Project bookkeeping: on-disk layout, configuration, and the SQLite database.
//!
//! The database records which binaries a project tracks and a summary of
//! every scan run against them. Signature files, reports and layout
//! snapshots stay as plain JSON/YAML files next to it (see [`ProjectLayout`]).

mod config;
mod context;
mod layout;
mod models;
mod project_db;
mod util;

pub use config::{DbConfig, ProjectConfig, ScanSettings};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use models::{BinaryRecord, ScanRunRecord};
pub use project_db::{DbError, DbResult, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, save_project_config};

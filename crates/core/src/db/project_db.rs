use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::db::{BinaryRecord, ScanRunRecord};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for project database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed project database.
///
/// A thin wrapper around `rusqlite::Connection` that opens/creates the file,
/// applies schema migrations, and offers small typed helpers.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

fn map_binary(row: &rusqlite::Row<'_>) -> rusqlite::Result<BinaryRecord> {
    Ok(BinaryRecord { name: row.get(0)?, path: row.get(1)?, arch: row.get(2)?, hash: row.get(3)? })
}

fn map_scan_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanRunRecord> {
    Ok(ScanRunRecord {
        binary: row.get(0)?,
        binary_hash: row.get(1)?,
        signatures_total: row.get(2)?,
        matched: row.get(3)?,
        missing: row.get(4)?,
        changes: row.get(5)?,
        patterns: row.get(6)?,
        scanned_at: row.get(7)?,
    })
}

impl ProjectDb {
    /// Open (or create) a project database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose the underlying connection for advanced callers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a binary record and return its row id.
    pub fn insert_binary(&self, record: &BinaryRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO binaries (name, path, arch, hash)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![record.name, record.path, record.arch, record.hash],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all binaries (ordered by id).
    pub fn list_binaries(&self) -> DbResult<Vec<BinaryRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, path, arch, hash
            FROM binaries
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], map_binary)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Look up a binary by its project name (first registration wins).
    pub fn find_binary(&self, name: &str) -> DbResult<Option<BinaryRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT name, path, arch, hash
                FROM binaries
                WHERE name = ?1
                ORDER BY id
                LIMIT 1
                "#,
                params![name],
                map_binary,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert a scan summary and return its row id.
    pub fn insert_scan_run(&self, record: &ScanRunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO scan_runs (binary, binary_hash, signatures_total, matched, missing, changes, patterns, scanned_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.binary,
                record.binary_hash,
                record.signatures_total,
                record.matched,
                record.missing,
                record.changes,
                record.patterns,
                record.scanned_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List scan runs, optionally filtered by binary name.
    pub fn list_scan_runs(&self, binary: Option<&str>) -> DbResult<Vec<ScanRunRecord>> {
        let mut stmt = if binary.is_some() {
            self.conn.prepare(
                r#"
                SELECT binary, binary_hash, signatures_total, matched, missing, changes, patterns, scanned_at
                FROM scan_runs
                WHERE binary = ?1
                ORDER BY id
                "#,
            )?
        } else {
            self.conn.prepare(
                r#"
                SELECT binary, binary_hash, signatures_total, matched, missing, changes, patterns, scanned_at
                FROM scan_runs
                ORDER BY id
                "#,
            )?
        };

        let rows = if let Some(bin) = binary {
            stmt.query_map(params![bin], map_scan_run)?
        } else {
            stmt.query_map([], map_scan_run)?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: binaries
/// - 2: scan_runs
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS binaries (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                arch TEXT,
                hash TEXT
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS scan_runs (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                binary           TEXT NOT NULL,
                binary_hash      TEXT NOT NULL,
                signatures_total INTEGER NOT NULL,
                matched          INTEGER NOT NULL,
                missing          INTEGER NOT NULL,
                changes          INTEGER NOT NULL,
                patterns         INTEGER NOT NULL,
                scanned_at       TEXT NOT NULL
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

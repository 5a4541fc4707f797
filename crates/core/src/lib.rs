//! drift-core
//!
//! Core library for detecting struct-offset drift in recompiled PE binaries.
//!
//! Two evidence sources are reconciled here: a symbolic diff of two declared
//! layout snapshots ([`drift`]) and byte-pattern signatures matched directly
//! against the compiled binary ([`scanner`]). [`verify`] cross-checks the two.
//!
//! All substantive logic lives in this crate so it is testable without the
//! CLI frontend.

pub mod cluster;
pub mod db;
pub mod drift;
pub mod index;
pub mod model;
pub mod pattern;
pub mod pe;
pub mod scanner;
pub mod signature;
pub mod verify;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

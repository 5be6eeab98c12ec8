//! Core domain logic for Lookout
//!
//! This crate provides the pieces that reconstruct what physically changed
//! on disk from low-level notification events:
//! - Path Record (in-memory metadata mirror of watched trees)
//! - Directory diff engine (live listing vs. record)
//! - File change detector (mtime/mode/content-hash cascade)
//! - Silencer (ignore/only pattern predicate)
//! - BLAKE3 content hashing helpers

pub mod detect;
pub mod hash;
pub mod record;
pub mod scan;
pub mod silencer;

use std::path::PathBuf;

// Re-exports
pub use detect::{detect, FileChange, HashingMode};
pub use hash::Blake3Hash;
pub use record::{
    resolve_roots, shared_record, EntryKind, EntryMeta, EntryPatch, PathRecord, SharedRecord,
};
pub use scan::{scan, ScanEvent, ScanOptions};
pub use silencer::Silencer;

/// Result type for core operations
pub type Result<T> = anyhow::Result<T>;

/// Errors raised while validating watched directories or rebuilding the
/// record baseline. These fail fast at construction/start time and are
/// never recovered into a degraded watch.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// A symlink cycle was found while walking a watched tree.
    #[error(
        "symlink loop detected: {path} points back into already-visited {ancestor}"
    )]
    SymlinkLoop { path: PathBuf, ancestor: PathBuf },

    /// A watched path exists but is not a directory.
    #[error("watched path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A watched path does not exist or cannot be resolved.
    #[error("watched path cannot be resolved: {path}: {source}")]
    Unresolvable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Two watched paths resolve to the same real directory.
    #[error(
        "watched paths {first} and {second} resolve to the same real path {target}"
    )]
    DuplicateRoot {
        first: PathBuf,
        second: PathBuf,
        target: PathBuf,
    },
}

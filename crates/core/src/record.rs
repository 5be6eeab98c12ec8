//! Path Record: an in-memory metadata mirror of watched directory trees
//!
//! The record maps every observed directory to its last-known listing
//! (basename -> kind/mtime/mode/optional content hash). Entries absent
//! from a directory's map are considered nonexistent at last observation.
//! All mutation goes through a single lock; readers copy out under the
//! same lock when they need a stable snapshot.

use crate::hash::Blake3Hash;
use crate::SetupError;
use ahash::AHashMap;
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Kind of a watched entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (or symlink; the record does not follow links)
    File,
    /// Directory
    Dir,
}

/// Last-observed metadata for a single directory entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryMeta {
    /// Kind of entry
    pub kind: EntryKind,
    /// Modification time, floating-point seconds since the epoch
    pub mtime: f64,
    /// Unix permission bits
    pub mode: u32,
    /// Content hash, populated lazily by the change detector
    pub hash: Option<Blake3Hash>,
}

impl EntryMeta {
    /// Metadata for a directory entry (mtime/mode of directories are not
    /// consulted by the diff engine, only presence matters)
    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            mtime: 0.0,
            mode: 0,
            hash: None,
        }
    }

    /// Metadata for a file entry with known stat fields
    pub fn file(mtime: f64, mode: u32) -> Self {
        Self {
            kind: EntryKind::File,
            mtime,
            mode,
            hash: None,
        }
    }
}

/// Partial update for a record entry
///
/// `set` merges a patch into any existing entry: `Some` fields overwrite,
/// `None` fields are retained. This supports point updates such as bumping
/// only the mtime after a detector pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryPatch {
    pub kind: Option<EntryKind>,
    pub mtime: Option<f64>,
    pub mode: Option<u32>,
    pub hash: Option<Blake3Hash>,
}

impl EntryPatch {
    /// Patch that replaces every field from full metadata
    pub fn full(meta: EntryMeta) -> Self {
        Self {
            kind: Some(meta.kind),
            mtime: Some(meta.mtime),
            mode: Some(meta.mode),
            hash: meta.hash,
        }
    }

    /// Patch carrying only a content hash
    pub fn hash(hash: Blake3Hash) -> Self {
        Self {
            hash: Some(hash),
            ..Self::default()
        }
    }
}

/// Convert a stat mtime to floating-point seconds since the epoch
pub fn mtime_seconds(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Unix permission bits of a stat result (0 on non-unix platforms)
pub fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// In-memory mirror of watched directories' metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathRecord {
    /// absolute directory path -> basename -> metadata
    dirs: AHashMap<PathBuf, AHashMap<String, EntryMeta>>,
}

/// Shared handle to a record; exactly one writer at a time
pub type SharedRecord = Arc<Mutex<PathRecord>>;

/// Create an empty shared record
pub fn shared_record() -> SharedRecord {
    Arc::new(Mutex::new(PathRecord::new()))
}

impl PathRecord {
    /// Create a new empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge-insert an entry. New fields overwrite, unspecified fields are
    /// retained. A patch whose kind differs from the stored kind replaces
    /// the entry outright (a path that flipped file<->dir shares nothing
    /// with its predecessor).
    pub fn set(&mut self, directory: &Path, basename: &str, patch: EntryPatch) {
        let entries = self.dirs.entry(directory.to_path_buf()).or_default();
        let existing = entries.get(basename).copied();

        let merged = match existing {
            Some(prev) if patch.kind.map_or(true, |k| k == prev.kind) => EntryMeta {
                kind: prev.kind,
                mtime: patch.mtime.unwrap_or(prev.mtime),
                mode: patch.mode.unwrap_or(prev.mode),
                hash: patch.hash.or(prev.hash),
            },
            _ => EntryMeta {
                kind: patch.kind.unwrap_or(EntryKind::File),
                mtime: patch.mtime.unwrap_or(0.0),
                mode: patch.mode.unwrap_or(0),
                hash: patch.hash,
            },
        };
        entries.insert(basename.to_string(), merged);
    }

    /// Remove an entry; no-op if absent
    pub fn unset(&mut self, directory: &Path, basename: &str) {
        if let Some(entries) = self.dirs.get_mut(directory) {
            entries.remove(basename);
        }
    }

    /// Remove an entry addressed by a path relative to a watched root
    pub fn unset_at(&mut self, root: &Path, rel_path: &Path) {
        let parent = rel_path.parent().unwrap_or(Path::new(""));
        if let Some(name) = rel_path.file_name() {
            let dir = root.join(parent);
            self.unset(&dir, &name.to_string_lossy());
        }
    }

    /// Get an entry's metadata
    pub fn get(&self, directory: &Path, basename: &str) -> Option<EntryMeta> {
        self.dirs.get(directory)?.get(basename).copied()
    }

    /// Snapshot a directory's last-known listing (empty if unknown)
    pub fn list(&self, directory: &Path) -> AHashMap<String, EntryMeta> {
        self.dirs.get(directory).cloned().unwrap_or_default()
    }

    /// Whether a directory has been observed
    pub fn knows_dir(&self, directory: &Path) -> bool {
        self.dirs.contains_key(directory)
    }

    /// Mark a directory as observed (empty listing if new)
    pub fn add_dir(&mut self, directory: &Path) {
        self.dirs.entry(directory.to_path_buf()).or_default();
    }

    /// Forget a directory's listing entirely
    pub fn unset_dir(&mut self, directory: &Path) {
        self.dirs.remove(directory);
    }

    /// Drop all state
    pub fn clear(&mut self) {
        self.dirs.clear();
    }

    /// Number of observed directories
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Clear all state and walk every root, recording file and directory
    /// metadata as the new baseline.
    ///
    /// The walk is iterative (walkdir's own stack, not recursion) and
    /// follows symlinks so that a symlink cycle is detected and reported
    /// rather than silently skipped. Entries that vanish or are unreadable
    /// mid-walk are skipped, not errors: the filesystem is racy by nature.
    pub fn rebuild(&mut self, roots: &[PathBuf]) -> Result<()> {
        self.clear();

        for root in roots {
            self.add_dir(root);
            for entry in WalkDir::new(root).follow_links(true).min_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        if let Some(ancestor) = err.loop_ancestor() {
                            return Err(SetupError::SymlinkLoop {
                                path: err
                                    .path()
                                    .map(Path::to_path_buf)
                                    .unwrap_or_else(|| root.clone()),
                                ancestor: ancestor.to_path_buf(),
                            }
                            .into());
                        }
                        trace!("skipping unreadable entry during rebuild: {err}");
                        continue;
                    }
                };

                let path = entry.path();
                let (parent, name) = match (path.parent(), path.file_name()) {
                    (Some(parent), Some(name)) => (parent, name.to_string_lossy()),
                    _ => continue,
                };

                if entry.file_type().is_dir() {
                    self.add_dir(path);
                    self.set(parent, &name, EntryPatch::full(EntryMeta::dir()));
                } else {
                    // Vanished between listing and stat: skip
                    let meta = match std::fs::symlink_metadata(path) {
                        Ok(meta) => meta,
                        Err(_) => continue,
                    };
                    self.set(
                        parent,
                        &name,
                        EntryPatch::full(EntryMeta::file(
                            mtime_seconds(&meta),
                            mode_bits(&meta),
                        )),
                    );
                }
            }
        }

        debug!(dirs = self.dir_count(), "record baseline rebuilt");
        Ok(())
    }
}

/// Resolve watched roots: canonicalize each path, require directories, and
/// reject two roots resolving to the same real path.
pub fn resolve_roots(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::with_capacity(dirs.len());
    let mut seen: AHashMap<PathBuf, PathBuf> = AHashMap::new();

    for dir in dirs {
        let canon = std::fs::canonicalize(dir).map_err(|source| SetupError::Unresolvable {
            path: dir.clone(),
            source,
        })?;
        if !canon.is_dir() {
            return Err(SetupError::NotADirectory(dir.clone()).into());
        }
        if let Some(first) = seen.get(&canon) {
            return Err(SetupError::DuplicateRoot {
                first: first.clone(),
                second: dir.clone(),
                target: canon,
            }
            .into());
        }
        seen.insert(canon.clone(), dir.clone());
        resolved.push(canon);
    }

    Ok(resolved)
}

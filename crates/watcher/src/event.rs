//! Raw change events and logical change batches
//!
//! Backend adapters normalize heterogeneous native notifications into
//! [`RawChange`] tuples; the debounce processor reduces a settled batch of
//! them into one [`ChangeBatch`] for the user callback.

use lookout_core::EntryKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Raw change kind as reported by a backend, before detection/squashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Modified,
    Added,
    Removed,
    /// Rename target half; pairs with `MovedFrom` via the cookie
    MovedTo,
    /// Rename source half
    MovedFrom,
    /// The backend only knows *something* happened; the detector or the
    /// diff engine decides what.
    Unknown,
}

/// One normalized raw change tuple.
///
/// Transient: created by an adapter, consumed by the debounce processor,
/// discarded after optimization. Serializable because the TCP transport
/// forwards these verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// File-level or directory-level change
    pub entry: EntryKind,
    /// What the backend believes happened
    pub change: ChangeKind,
    /// The watched root this change belongs to
    pub directory: PathBuf,
    /// Path relative to `directory`
    pub rel_path: PathBuf,
    /// For directory events: whether the resolver should recurse
    pub recursive: bool,
    /// Correlation cookie linking paired move-out/move-in events
    pub cookie: Option<u64>,
}

impl RawChange {
    /// File-level change
    pub fn file(change: ChangeKind, directory: impl Into<PathBuf>, rel_path: impl Into<PathBuf>) -> Self {
        Self {
            entry: EntryKind::File,
            change,
            directory: directory.into(),
            rel_path: rel_path.into(),
            recursive: false,
            cookie: None,
        }
    }

    /// Directory-level change to be resolved by the diff engine
    pub fn dir(directory: impl Into<PathBuf>, rel_path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            entry: EntryKind::Dir,
            change: ChangeKind::Unknown,
            directory: directory.into(),
            rel_path: rel_path.into(),
            recursive,
            cookie: None,
        }
    }

    /// Attach a correlation cookie
    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Absolute path of the affected entry
    pub fn abs_path(&self) -> PathBuf {
        self.directory.join(&self.rel_path)
    }
}

/// The logical result of one settled batch: disjoint sets of paths.
///
/// A path appears in at most one bucket. Sets are ordered so identical
/// filesystem outcomes produce identical callback arguments regardless of
/// raw event ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub modified: BTreeSet<PathBuf>,
    pub added: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
}

impl ChangeBatch {
    /// Whether any logical change survived optimization
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Insert a path into the named bucket (disjointness is restored later
    /// by the optimizer's reconcile pass)
    pub fn insert(&mut self, change: lookout_core::FileChange, path: PathBuf) {
        use lookout_core::FileChange;
        match change {
            FileChange::Modified => self.modified.insert(path),
            FileChange::Added => self.added.insert(path),
            FileChange::Removed => self.removed.insert(path),
        };
    }

    /// Consume into sorted vectors for callback delivery
    pub fn into_vecs(self) -> (Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) {
        (
            self.modified.into_iter().collect(),
            self.added.into_iter().collect(),
            self.removed.into_iter().collect(),
        )
    }

    /// Strip each path down to be relative to the first matching root
    pub fn relativize(&mut self, roots: &[PathBuf]) {
        let strip = |set: &BTreeSet<PathBuf>| {
            set.iter()
                .map(|path| relative_to_roots(path, roots))
                .collect()
        };
        self.modified = strip(&self.modified);
        self.added = strip(&self.added);
        self.removed = strip(&self.removed);
    }
}

fn relative_to_roots(path: &Path, roots: &[PathBuf]) -> PathBuf {
    for root in roots {
        if let Ok(rel) = path.strip_prefix(root) {
            return rel.to_path_buf();
        }
    }
    path.to_path_buf()
}

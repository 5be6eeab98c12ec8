//! Directory diff engine
//!
//! Compares a directory's live listing against the Path Record and emits
//! per-entry candidate events while keeping the record current. The engine
//! never hashes file contents; byte-level modification detection is the
//! change detector's job, invoked per file by the event pipeline.

use crate::record::{mode_bits, mtime_seconds, EntryKind, EntryMeta, EntryPatch, PathRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Options for a single scan pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Emit directory events for subdirectories so the caller recurses
    /// into them. Single-level scans (e.g. resolving one FSEvents tick)
    /// leave this unset.
    pub recursive: bool,
    /// Record entries without emitting file events. Used to establish a
    /// baseline without notifying anyone. Directory events are still
    /// emitted: they only drive recursion, they are not user-visible.
    pub silence: bool,
}

/// Event emitted by a scan pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A file that may have changed; the change detector decides what, if
    /// anything, actually happened (including removal).
    File { rel_path: PathBuf },
    /// A directory that needs its own scan pass.
    Dir { rel_path: PathBuf, recursive: bool },
}

/// Scan `root.join(rel_dir)`, emitting change candidates and updating the
/// record.
///
/// If the directory no longer exists it is treated as deleted: its record
/// listing is dropped and every previously-known entry is emitted so that
/// files resolve to removals and subdirectories are logically recursed
/// through even though they are gone from disk.
pub fn scan(
    record: &mut PathRecord,
    root: &Path,
    rel_dir: &Path,
    opts: ScanOptions,
    emit: &mut dyn FnMut(ScanEvent),
) {
    let abs_dir = root.join(rel_dir);
    let previous = record.list(&abs_dir);

    let listing = match std::fs::read_dir(&abs_dir) {
        Ok(listing) => listing,
        Err(err) => {
            // Directory vanished (or became unreadable): emit everything
            // we used to know about it and forget the listing.
            trace!("scan: {} unreadable ({err}); treating as deleted", abs_dir.display());
            record.unset_dir(&abs_dir);
            for (name, meta) in previous {
                emit_entry(rel_dir, &name, meta.kind, true, opts, emit);
            }
            return;
        }
    };

    record.add_dir(&abs_dir);

    let mut seen: HashSet<String> = HashSet::new();
    for entry in listing {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                trace!("scan: skipping unreadable entry in {}: {err}", abs_dir.display());
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();

        // Classification follows symlinks so a symlink to a directory is
        // scanned like the directory it points at (matching rebuild).
        let is_dir = std::fs::metadata(entry.path())
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if is_dir {
            record.set(&abs_dir, &name, EntryPatch::full(EntryMeta::dir()));
            emit_entry(rel_dir, &name, EntryKind::Dir, opts.recursive, opts, emit);
        } else {
            if opts.silence {
                // Baseline mode: record metadata directly, no notification.
                if let Ok(meta) = std::fs::symlink_metadata(entry.path()) {
                    record.set(
                        &abs_dir,
                        &name,
                        EntryPatch::full(EntryMeta::file(
                            mtime_seconds(&meta),
                            mode_bits(&meta),
                        )),
                    );
                }
            } else {
                emit_entry(rel_dir, &name, EntryKind::File, false, opts, emit);
            }
        }
        seen.insert(name);
    }

    // Previously-known entries that are gone: files resolve to removals in
    // the detector; directories are recursed so descendants get reported.
    for (name, meta) in previous {
        if seen.contains(&name) {
            continue;
        }
        match meta.kind {
            EntryKind::File => emit_entry(rel_dir, &name, EntryKind::File, false, opts, emit),
            EntryKind::Dir => emit_entry(rel_dir, &name, EntryKind::Dir, true, opts, emit),
        }
    }
}

fn emit_entry(
    rel_dir: &Path,
    name: &str,
    kind: EntryKind,
    recursive: bool,
    opts: ScanOptions,
    emit: &mut dyn FnMut(ScanEvent),
) {
    let rel_path = rel_dir.join(name);
    match kind {
        EntryKind::Dir => emit(ScanEvent::Dir {
            rel_path,
            recursive,
        }),
        EntryKind::File => {
            if !opts.silence {
                emit(ScanEvent::File { rel_path });
            }
        }
    }
}

//! File change detector
//!
//! Decides added/modified/removed/unchanged for a single file using a
//! mtime-then-mode-then-hash cascade against the Path Record, updating the
//! record as a side effect. Times are floating-point seconds; "newer" is a
//! strict comparison so re-statting an untouched file never reports a
//! change.

use crate::hash::hash_file;
use crate::record::{mode_bits, mtime_seconds, EntryKind, EntryMeta, EntryPatch, PathRecord};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Logical change reported for a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Added,
    Modified,
    Removed,
}

/// When to fall back to content hashing for files whose mtime and mode are
/// unchanged.
///
/// mtime granularity is whole seconds on several platforms, so an edit in
/// the same second as the recorded mtime is invisible to the stat cascade.
/// This is explicit configuration rather than a host-OS guess so that the
/// behavior is testable everywhere and can be disabled for performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashingMode {
    /// Never hash; same-second edits may be missed.
    Never,
    /// Hash only when the wall clock is still within the same whole second
    /// as the file's mtime (the window where stat cannot tell).
    #[default]
    SameSecond,
    /// Hash whenever stat reports no change.
    Always,
}

/// Detect what happened to `root.join(rel_path)` since last observation.
///
/// Returns `None` when nothing observable changed, including a vanished
/// path that was never recorded (created and deleted between
/// observations). Mutates the record: vanished entries are purged, fresh
/// stat fields (and hashes, when the fallback fires) are stored.
pub fn detect(
    record: &mut PathRecord,
    root: &Path,
    rel_path: &Path,
    hashing: HashingMode,
) -> Option<FileChange> {
    let abs = root.join(rel_path);
    let parent = abs.parent()?.to_path_buf();
    let name = abs.file_name()?.to_string_lossy().into_owned();

    // Symlink-aware stat: a dangling symlink is still an entry.
    let meta = match std::fs::symlink_metadata(&abs) {
        Ok(meta) => meta,
        Err(_) => {
            // Only a removal if the path was ever observed; a path that
            // appeared and vanished between observations never existed
            // from this record's view.
            return if record.get(&parent, &name).is_some() {
                record.unset(&parent, &name);
                Some(FileChange::Removed)
            } else {
                None
            };
        }
    };
    let mtime = mtime_seconds(&meta);
    let mode = mode_bits(&meta);

    let known = match record.get(&parent, &name) {
        Some(known) if known.kind == EntryKind::File => known,
        _ => {
            record.set(&parent, &name, EntryPatch::full(EntryMeta::file(mtime, mode)));
            return Some(FileChange::Added);
        }
    };

    if mode != known.mode {
        record.set(&parent, &name, EntryPatch::full(EntryMeta::file(mtime, mode)));
        return Some(FileChange::Modified);
    }

    if mtime > known.mtime {
        record.set(&parent, &name, EntryPatch::full(EntryMeta::file(mtime, mode)));
        return Some(FileChange::Modified);
    }

    // Same mtime, same mode. Optionally look at content.
    let should_hash = match hashing {
        HashingMode::Never => false,
        HashingMode::Always => true,
        HashingMode::SameSecond => within_mtime_granularity(mtime),
    };
    if !should_hash {
        return None;
    }

    let current = match hash_file(&abs) {
        Ok(hash) => hash,
        Err(err) => {
            if abs.exists() {
                trace!("detect: failed to hash {}: {err}", abs.display());
                return None;
            }
            record.unset(&parent, &name);
            return Some(FileChange::Removed);
        }
    };

    match known.hash {
        Some(previous) if previous != current => {
            record.set(
                &parent,
                &name,
                EntryPatch {
                    mtime: Some(mtime),
                    mode: Some(mode),
                    hash: Some(current),
                    ..EntryPatch::default()
                },
            );
            Some(FileChange::Modified)
        }
        Some(_) => None,
        None => {
            // First consultation in the ambiguous window: remember the
            // hash so the next same-second edit is caught.
            record.set(&parent, &name, EntryPatch::hash(current));
            None
        }
    }
}

/// Whether the wall clock is still within the same whole-second unit as
/// the given mtime, i.e. stat alone cannot rule out a later edit.
fn within_mtime_granularity(mtime: f64) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    now.floor() <= mtime.floor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stat_patch(path: &Path) -> EntryPatch {
        let meta = fs::symlink_metadata(path).unwrap();
        EntryPatch::full(EntryMeta::file(mtime_seconds(&meta), mode_bits(&meta)))
    }

    #[test]
    fn test_fresh_path_is_added() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("new.txt"), b"x").unwrap();

        let mut record = PathRecord::new();
        let change = detect(&mut record, root, Path::new("new.txt"), HashingMode::Never);

        assert_eq!(change, Some(FileChange::Added));
        assert!(record.get(root, "new.txt").is_some());
    }

    #[test]
    fn test_unchanged_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("same.txt");
        fs::write(&file, b"x").unwrap();

        // Backdate so the same-second hashing window cannot matter here.
        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(60));
        set_file_mtime(&file, old).unwrap();

        let mut record = PathRecord::new();
        record.set(root, "same.txt", stat_patch(&file));

        let change = detect(&mut record, root, Path::new("same.txt"), HashingMode::SameSecond);
        assert_eq!(change, None);
    }

    #[test]
    fn test_newer_mtime_is_modified() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("bump.txt");
        fs::write(&file, b"x").unwrap();

        let mut record = PathRecord::new();
        record.set(root, "bump.txt", stat_patch(&file));

        let newer = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(60));
        set_file_mtime(&file, newer).unwrap();

        let change = detect(&mut record, root, Path::new("bump.txt"), HashingMode::Never);
        assert_eq!(change, Some(FileChange::Modified));
    }

    #[test]
    fn test_older_mtime_is_not_modified() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("back.txt");
        fs::write(&file, b"x").unwrap();

        let mut record = PathRecord::new();
        record.set(root, "back.txt", stat_patch(&file));

        let older = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(60));
        set_file_mtime(&file, older).unwrap();

        let change = detect(&mut record, root, Path::new("back.txt"), HashingMode::Never);
        assert_eq!(change, None, "strictly-newer comparison only");
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_change_is_modified() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("mode.txt");
        fs::write(&file, b"x").unwrap();

        let mut record = PathRecord::new();
        record.set(root, "mode.txt", stat_patch(&file));

        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();
        // Keep mtime identical so only the mode cascade can fire.
        let recorded = record.get(root, "mode.txt").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(recorded.mtime as i64, 0)).unwrap();

        let change = detect(&mut record, root, Path::new("mode.txt"), HashingMode::Never);
        assert_eq!(change, Some(FileChange::Modified));
    }

    #[test]
    fn test_never_recorded_vanished_path_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        // Created and deleted between observations: no record entry, no
        // file on disk. Nothing to report.
        let mut record = PathRecord::new();
        let change = detect(&mut record, root, Path::new("ghost.txt"), HashingMode::Never);

        assert_eq!(change, None);
        assert_eq!(record.dir_count(), 0);
    }

    #[test]
    fn test_vanished_path_is_removed_and_purged() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut record = PathRecord::new();
        record.set(root, "ghost.txt", EntryPatch::full(EntryMeta::file(1.0, 0o644)));

        let change = detect(&mut record, root, Path::new("ghost.txt"), HashingMode::Never);
        assert_eq!(change, Some(FileChange::Removed));
        assert!(record.get(root, "ghost.txt").is_none());
    }

    #[test]
    fn test_same_second_edit_caught_with_always_hashing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("racy.txt");
        fs::write(&file, b"before").unwrap();

        let mut record = PathRecord::new();
        record.set(root, "racy.txt", stat_patch(&file));

        // Prime the stored hash.
        let change = detect(&mut record, root, Path::new("racy.txt"), HashingMode::Always);
        assert_eq!(change, None);

        // Edit content but force the recorded mtime back onto the file so
        // stat sees nothing.
        let recorded = record.get(root, "racy.txt").unwrap();
        fs::write(&file, b"after!").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(recorded.mtime as i64, 0)).unwrap();
        record.set(
            root,
            "racy.txt",
            EntryPatch {
                mtime: Some(recorded.mtime),
                mode: Some(mode_bits(&fs::symlink_metadata(&file).unwrap())),
                ..EntryPatch::default()
            },
        );

        let change = detect(&mut record, root, Path::new("racy.txt"), HashingMode::Always);
        assert_eq!(change, Some(FileChange::Modified));
    }

    #[test]
    fn test_hashing_disabled_misses_same_second_edit() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let file = root.join("quiet.txt");
        fs::write(&file, b"before").unwrap();

        let mut record = PathRecord::new();
        record.set(root, "quiet.txt", stat_patch(&file));
        let recorded = record.get(root, "quiet.txt").unwrap();

        fs::write(&file, b"after!").unwrap();
        set_file_mtime(&file, FileTime::from_unix_time(recorded.mtime as i64, 0)).unwrap();
        record.set(
            root,
            "quiet.txt",
            EntryPatch {
                mtime: Some(recorded.mtime),
                mode: Some(mode_bits(&fs::symlink_metadata(&file).unwrap())),
                ..EntryPatch::default()
            },
        );

        let change = detect(&mut record, root, Path::new("quiet.txt"), HashingMode::Never);
        assert_eq!(change, None, "Never mode must not hash");
    }
}

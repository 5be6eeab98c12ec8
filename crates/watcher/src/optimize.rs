//! Queue optimizer: change squashing
//!
//! Reduces a settled batch of raw events to the minimal logical change
//! set. Two passes:
//! 1. `squash_renames` resolves cookie-correlated move pairs before the
//!    batch hits the detector (order-sensitive: a `MovedFrom` pairs with
//!    the next `MovedTo` carrying the same cookie).
//! 2. `reconcile` restores bucket disjointness after detection, collapsing
//!    add+remove-of-the-same-path noise into a modification or a no-op.
//!    This pass is order-insensitive: equivalent raw orderings yield the
//!    same logical result.

use crate::event::{ChangeKind, ChangeBatch, RawChange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Resolve rename pairs within one batch.
///
/// A correlated pair whose target exists on disk squashes to a single
/// `Added` at the new path; the old path is returned in the drop list so
/// the caller can purge its record entry without reporting a removal.
/// Unpaired halves degrade to plain `Removed`/`Added`. Non-local sources
/// (`local_fs == false`) skip the existence check because the paths may
/// not exist on this machine at all.
pub fn squash_renames(
    events: Vec<RawChange>,
    local_fs: bool,
) -> (Vec<RawChange>, Vec<(PathBuf, PathBuf)>) {
    // cookie -> index of the pending MovedFrom half
    let mut pending_from: HashMap<u64, usize> = HashMap::new();
    let mut out: Vec<Option<RawChange>> = Vec::with_capacity(events.len());
    let mut dropped: Vec<(PathBuf, PathBuf)> = Vec::new();

    for event in events {
        match (event.change, event.cookie) {
            (ChangeKind::MovedFrom, Some(cookie)) => {
                pending_from.insert(cookie, out.len());
                out.push(Some(event));
            }
            (ChangeKind::MovedTo, Some(cookie)) => {
                if let Some(from_idx) = pending_from.remove(&cookie) {
                    let from = out[from_idx].take().expect("pending half present");
                    let target_exists = !local_fs || event.abs_path().exists();
                    if target_exists {
                        trace!(
                            "squash: rename {} -> {} (cookie {cookie})",
                            from.rel_path.display(),
                            event.rel_path.display()
                        );
                        dropped.push((from.directory.clone(), from.rel_path.clone()));
                        out.push(Some(RawChange {
                            change: ChangeKind::Added,
                            cookie: None,
                            ..event
                        }));
                    } else {
                        // Moved and then deleted: only the source removal
                        // is real.
                        out[from_idx] = Some(RawChange {
                            change: ChangeKind::Removed,
                            cookie: None,
                            ..from
                        });
                    }
                } else {
                    out.push(Some(event));
                }
            }
            _ => out.push(Some(event)),
        }
    }

    // Degrade unpaired halves.
    let resolved = out
        .into_iter()
        .flatten()
        .map(|event| match event.change {
            ChangeKind::MovedFrom => RawChange {
                change: ChangeKind::Removed,
                cookie: None,
                ..event
            },
            ChangeKind::MovedTo => RawChange {
                change: ChangeKind::Added,
                cookie: None,
                ..event
            },
            _ => event,
        })
        .collect();

    (resolved, dropped)
}

/// Restore disjointness across the modified/added/removed buckets.
///
/// - added ∩ removed: the path churned within one batch. If it exists now
///   the pair collapses to `modified`; if not, both cancel to a no-op.
/// - added ∩ modified: `added` wins (the path is new to the observer).
/// - removed ∩ modified: resolved by existence.
pub fn reconcile(mut batch: ChangeBatch, exists: impl Fn(&Path) -> bool) -> ChangeBatch {
    let churned: Vec<PathBuf> = batch
        .added
        .intersection(&batch.removed)
        .cloned()
        .collect();
    for path in churned {
        batch.added.remove(&path);
        batch.removed.remove(&path);
        batch.modified.remove(&path);
        if exists(&path) {
            batch.modified.insert(path);
        }
    }

    let added_and_modified: Vec<PathBuf> = batch
        .added
        .intersection(&batch.modified)
        .cloned()
        .collect();
    for path in added_and_modified {
        batch.modified.remove(&path);
    }

    let removed_and_modified: Vec<PathBuf> = batch
        .removed
        .intersection(&batch.modified)
        .cloned()
        .collect();
    for path in removed_and_modified {
        if exists(&path) {
            batch.removed.remove(&path);
        } else {
            batch.modified.remove(&path);
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn paths(entries: &[&str]) -> BTreeSet<PathBuf> {
        entries.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_correlated_pair_squashes_to_added() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("bar"), b"x").unwrap();

        let events = vec![
            RawChange::file(ChangeKind::MovedFrom, root, "foo").with_cookie(7),
            RawChange::file(ChangeKind::MovedTo, root, "bar").with_cookie(7),
        ];

        let (resolved, dropped) = squash_renames(events, true);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].change, ChangeKind::Added);
        assert_eq!(resolved[0].rel_path, PathBuf::from("bar"));
        assert_eq!(dropped, vec![(root.to_path_buf(), PathBuf::from("foo"))]);
    }

    #[test]
    fn test_pair_with_missing_target_keeps_only_removal() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let events = vec![
            RawChange::file(ChangeKind::MovedFrom, root, "foo").with_cookie(3),
            RawChange::file(ChangeKind::MovedTo, root, "bar").with_cookie(3),
        ];

        let (resolved, dropped) = squash_renames(events, true);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].change, ChangeKind::Removed);
        assert_eq!(resolved[0].rel_path, PathBuf::from("foo"));
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_unpaired_halves_degrade() {
        let events = vec![
            RawChange::file(ChangeKind::MovedFrom, "/w", "a").with_cookie(1),
            RawChange::file(ChangeKind::MovedTo, "/w", "b").with_cookie(2),
        ];

        let (resolved, dropped) = squash_renames(events, false);

        assert_eq!(resolved[0].change, ChangeKind::Removed);
        assert_eq!(resolved[1].change, ChangeKind::Added);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_non_local_pair_skips_existence_check() {
        let events = vec![
            RawChange::file(ChangeKind::MovedFrom, "/remote", "old").with_cookie(9),
            RawChange::file(ChangeKind::MovedTo, "/remote", "new").with_cookie(9),
        ];

        let (resolved, _) = squash_renames(events, false);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].change, ChangeKind::Added);
        assert_eq!(resolved[0].rel_path, PathBuf::from("new"));
    }

    #[test]
    fn test_add_remove_same_path_collapses_to_modified_when_present() {
        let mut batch = ChangeBatch::default();
        batch.added.insert(PathBuf::from("/w/bar"));
        batch.removed.insert(PathBuf::from("/w/bar"));

        let batch = reconcile(batch, |_| true);

        assert_eq!(batch.modified, paths(&["/w/bar"]));
        assert!(batch.added.is_empty());
        assert!(batch.removed.is_empty());
    }

    #[test]
    fn test_add_remove_same_path_cancels_when_absent() {
        let mut batch = ChangeBatch::default();
        batch.added.insert(PathBuf::from("/w/gone"));
        batch.removed.insert(PathBuf::from("/w/gone"));

        let batch = reconcile(batch, |_| false);

        assert!(batch.is_empty());
    }

    #[test]
    fn test_added_wins_over_modified() {
        let mut batch = ChangeBatch::default();
        batch.added.insert(PathBuf::from("/w/new"));
        batch.modified.insert(PathBuf::from("/w/new"));

        let batch = reconcile(batch, |_| true);

        assert_eq!(batch.added, paths(&["/w/new"]));
        assert!(batch.modified.is_empty());
    }

    #[test]
    fn test_removed_and_modified_resolved_by_existence() {
        let mut batch = ChangeBatch::default();
        batch.removed.insert(PathBuf::from("/w/x"));
        batch.modified.insert(PathBuf::from("/w/x"));

        let gone = reconcile(batch.clone(), |_| false);
        assert_eq!(gone.removed, paths(&["/w/x"]));
        assert!(gone.modified.is_empty());

        let here = reconcile(batch, |_| true);
        assert_eq!(here.modified, paths(&["/w/x"]));
        assert!(here.removed.is_empty());
    }

    #[test]
    fn test_reconcile_is_order_insensitive() {
        // Equivalent raw outcomes inserted in any order produce identical
        // buckets because the inputs are sets and the rules are pure.
        let mut a = ChangeBatch::default();
        a.added.insert(PathBuf::from("/w/1"));
        a.removed.insert(PathBuf::from("/w/1"));
        a.modified.insert(PathBuf::from("/w/2"));

        let mut b = ChangeBatch::default();
        b.modified.insert(PathBuf::from("/w/2"));
        b.removed.insert(PathBuf::from("/w/1"));
        b.added.insert(PathBuf::from("/w/1"));

        assert_eq!(reconcile(a, |_| true), reconcile(b, |_| true));
    }
}

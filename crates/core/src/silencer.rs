//! Silencer: pure predicate deciding whether a change should be suppressed
//!
//! Combines three pattern sources with fixed precedence:
//! 1. Built-in defaults (VCS metadata, build output, editor temp files)
//! 2. User `ignore` patterns (additive) or `ignore_replace` (drops defaults)
//! 3. User `only` allow-list: when non-empty, a file must match at least
//!    one `only` pattern AND no ignore pattern. Ignore always wins.
//!
//! Patterns are regular expressions matched against the path's string form
//! relative to its watched root. No state beyond the compiled patterns, so
//! the predicate is safe to call from any thread.

use crate::record::EntryKind;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;

/// Built-in ignore patterns, always active unless replaced wholesale.
const DEFAULT_IGNORE: &[&str] = &[
    // VCS metadata
    r"(^|/)\.git(/|$)",
    r"(^|/)\.svn(/|$)",
    r"(^|/)\.hg(/|$)",
    r"(^|/)\.jj(/|$)",
    r"(^|/)\.bundle(/|$)",
    // Build output and dependency caches
    r"(^|/)node_modules(/|$)",
    r"(^|/)__pycache__(/|$)",
    r"(^|/)target(/|$)",
    r"(^|/)\.idea(/|$)",
    r"(^|/)\.vscode(/|$)",
    // Editor swap/backup files
    r"\.sw[ponx]$",
    r"~$",
    r"(^|/)#[^/]*#$",
    r"(^|/)\.#[^/]*$",
    // OS noise
    r"(^|/)\.DS_Store$",
    r"(^|/)\._[^/]+$",
    r"(^|/)Thumbs\.db$",
    r"(^|/)desktop\.ini$",
    // Common ignorable extensions
    r"\.tmp$",
    r"\.pyc$",
];

/// Compiled ignore/only pattern sets
#[derive(Debug)]
pub struct Silencer {
    ignore: Vec<Regex>,
    only: Vec<Regex>,
}

impl Silencer {
    /// Build a silencer with the default ignore list and no `only` filter
    pub fn new() -> Self {
        Self {
            ignore: compile(DEFAULT_IGNORE.iter().copied()).expect("default patterns compile"),
            only: Vec::new(),
        }
    }

    /// Build from user configuration.
    ///
    /// `ignore_replace`, when present, replaces the defaults entirely;
    /// `ignore` adds to whatever base is active.
    pub fn from_patterns(
        ignore: &[String],
        ignore_replace: Option<&[String]>,
        only: &[String],
    ) -> Result<Self> {
        let mut silencer = match ignore_replace {
            Some(replacement) => Self {
                ignore: compile(replacement.iter().map(String::as_str))?,
                only: Vec::new(),
            },
            None => Self::new(),
        };
        silencer.add_ignore(ignore)?;
        silencer.set_only(only)?;
        Ok(silencer)
    }

    /// Append ignore patterns
    pub fn add_ignore(&mut self, patterns: &[String]) -> Result<()> {
        self.ignore
            .extend(compile(patterns.iter().map(String::as_str))?);
        Ok(())
    }

    /// Replace all ignore patterns (defaults included)
    pub fn replace_ignore(&mut self, patterns: &[String]) -> Result<()> {
        self.ignore = compile(patterns.iter().map(String::as_str))?;
        Ok(())
    }

    /// Replace the `only` allow-list
    pub fn set_only(&mut self, patterns: &[String]) -> Result<()> {
        self.only = compile(patterns.iter().map(String::as_str))?;
        Ok(())
    }

    /// Whether a change at `rel_path` should be suppressed.
    ///
    /// The allow-list applies to files only: directory events must flow so
    /// that files beneath them can still be considered.
    pub fn silenced(&self, rel_path: &Path, kind: EntryKind) -> bool {
        let path = rel_path.to_string_lossy();

        if kind == EntryKind::File
            && !self.only.is_empty()
            && !self.only.iter().any(|pattern| pattern.is_match(&path))
        {
            return true;
        }

        self.ignore.iter().any(|pattern| pattern.is_match(&path))
    }
}

impl Default for Silencer {
    fn default() -> Self {
        Self::new()
    }
}

fn compile<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<Vec<Regex>> {
    patterns
        .map(|pattern| {
            Regex::new(pattern).with_context(|| format!("invalid pattern: {pattern:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_silence_vcs_and_temp_files() {
        let silencer = Silencer::new();

        assert!(silencer.silenced(Path::new(".git/objects/ab/cd"), EntryKind::File));
        assert!(silencer.silenced(Path::new("src/.git"), EntryKind::Dir));
        assert!(silencer.silenced(Path::new("notes.txt~"), EntryKind::File));
        assert!(silencer.silenced(Path::new("src/main.rs.swp"), EntryKind::File));
        assert!(silencer.silenced(Path::new("deep/node_modules/pkg/index.js"), EntryKind::File));
        assert!(silencer.silenced(Path::new(".DS_Store"), EntryKind::File));

        assert!(!silencer.silenced(Path::new("src/main.rs"), EntryKind::File));
        assert!(!silencer.silenced(Path::new("README.md"), EntryKind::File));
        assert!(!silencer.silenced(Path::new("src"), EntryKind::Dir));
    }

    #[test]
    fn test_user_ignore_is_additive() {
        let silencer =
            Silencer::from_patterns(&strings(&[r"\.log$"]), None, &[]).unwrap();

        assert!(silencer.silenced(Path::new("debug.log"), EntryKind::File));
        // Defaults still active
        assert!(silencer.silenced(Path::new(".git/config"), EntryKind::File));
    }

    #[test]
    fn test_ignore_replace_drops_defaults() {
        let silencer =
            Silencer::from_patterns(&[], Some(&strings(&[r"\.log$"])), &[]).unwrap();

        assert!(silencer.silenced(Path::new("debug.log"), EntryKind::File));
        assert!(!silencer.silenced(Path::new(".git/config"), EntryKind::File));
    }

    #[test]
    fn test_only_allowlist_applies_to_files() {
        let silencer =
            Silencer::from_patterns(&[], None, &strings(&[r"\.rs$"])).unwrap();

        assert!(!silencer.silenced(Path::new("src/lib.rs"), EntryKind::File));
        assert!(silencer.silenced(Path::new("notes.md"), EntryKind::File));
        // Directories are not subject to the allow-list
        assert!(!silencer.silenced(Path::new("docs"), EntryKind::Dir));
    }

    #[test]
    fn test_ignore_wins_over_only() {
        let silencer = Silencer::from_patterns(
            &strings(&[r"secret"]),
            None,
            &strings(&[r"\.rs$"]),
        )
        .unwrap();

        // Matches the allow-list AND an ignore pattern: silenced.
        assert!(silencer.silenced(Path::new("secret/lib.rs"), EntryKind::File));
        assert!(!silencer.silenced(Path::new("open/lib.rs"), EntryKind::File));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let err = Silencer::from_patterns(&strings(&["("]), None, &[]).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }
}

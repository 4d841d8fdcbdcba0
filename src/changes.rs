//! # Change Detection
//!
//! Drift in a store is classified into three disjoint sets: added, changed and
//! deleted. Two sources feed a [`ChangeSet`]:
//!
//! - a hash diff between the previous lock and a fresh snapshot
//!   ([`ChangeSet::between`]), used by `commit`;
//! - the embedded repository's status ([`ChangeDetector`]), which avoids
//!   re-hashing the tree and is used to refuse verification of a dirty store.
//!
//! Only three status codes can legitimately appear in a store that is
//! mutated exclusively through keybank:
//!
//! ```text
//! ?? path   untracked  -> added
//!  M path   modified   -> changed
//!  D path   deleted    -> deleted
//! ```
//!
//! Anything else (staged entries, renames, conflicts) means someone ran git
//! directly inside the store, and is a hard error.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{KeybankError, Result};
use crate::git::VersionControl;
use crate::hash::Snapshot;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    /// Classify `current` against `previous`: set difference on paths, digest
    /// comparison on the paths both contain.
    pub fn between(previous: &Snapshot, current: &Snapshot) -> Self {
        let mut changes = ChangeSet::default();

        for (path, hash) in current {
            match previous.get(path) {
                None => {
                    changes.added.insert(path.clone());
                }
                Some(old) if old != hash => {
                    changes.changed.insert(path.clone());
                }
                Some(_) => {}
            }
        }
        for path in previous.keys() {
            if !current.contains_key(path) {
                changes.deleted.insert(path.clone());
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.deleted.len()
    }

    /// Merge another change set, re-rooting its paths under `prefix`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: ChangeSet) {
        let prefix = prefix.trim_end_matches('/');
        let reroot = |path: String| format!("{prefix}{path}");
        self.added.extend(other.added.into_iter().map(reroot));
        self.changed.extend(other.changed.into_iter().map(reroot));
        self.deleted.extend(other.deleted.into_iter().map(reroot));
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "no changes");
        }
        for path in &self.added {
            writeln!(f, "added:   {path}")?;
        }
        for path in &self.changed {
            writeln!(f, "changed: {path}")?;
        }
        for path in &self.deleted {
            writeln!(f, "deleted: {path}")?;
        }
        Ok(())
    }
}

/// Parse two-character status codes (`XY path`) into a [`ChangeSet`].
pub fn parse_status(text: &str) -> Result<ChangeSet> {
    let mut changes = ChangeSet::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (code, path) = match (line.get(..2), line.get(3..)) {
            (Some(code), Some(path)) if !path.trim().is_empty() => (code, path.trim()),
            _ => {
                return Err(KeybankError::ProtocolViolation {
                    code: line.to_string(),
                    path: String::new(),
                })
            }
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        match code {
            "??" => changes.added.insert(path),
            " M" => changes.changed.insert(path),
            " D" => changes.deleted.insert(path),
            _ => {
                return Err(KeybankError::ProtocolViolation {
                    code: code.to_string(),
                    path,
                })
            }
        };
    }

    Ok(changes)
}

/// Classifies drift from the repository's status without hashing the tree.
pub struct ChangeDetector<'a> {
    vcs: &'a dyn VersionControl,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(vcs: &'a dyn VersionControl) -> Self {
        Self { vcs }
    }

    pub fn detect(&self) -> Result<ChangeSet> {
        parse_status(&self.vcs.status()?)
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.detect()?.is_empty())
    }
}

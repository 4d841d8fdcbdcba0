//! # Verification Status
//!
//! A [`VerificationStatus`] folds every check a store performs into one
//! verdict while keeping per-path detail for the operator:
//!
//! - the repository consistency check,
//! - the diff between the lock file and the live tree,
//! - whether the tree has drifted from the repository since the last commit,
//! - store-specific checks (GPG keyring listings).
//!
//! Statuses from sub-stores are merged with [`VerificationStatus::merge_prefixed`]
//! so a whole keybank yields a single status.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{error, warn};

use crate::changes::ChangeSet;
use crate::hash::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    /// Present in the tree, absent from the lock.
    Added,
    /// Present in the lock, absent from the tree.
    Removed,
    /// Digest differs from the lock.
    Changed,
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileErrorKind::Added => "added",
            FileErrorKind::Removed => "removed",
            FileErrorKind::Changed => "changed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub kind: FileErrorKind,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub note: Option<String>,
}

impl FileError {
    pub fn new(kind: FileErrorKind, expected: Option<String>, actual: Option<String>) -> Self {
        Self {
            kind,
            expected,
            actual,
            note: None,
        }
    }

    /// The lock file itself could not be read.
    pub fn invalid_lock(reason: impl Into<String>) -> Self {
        Self {
            kind: FileErrorKind::Changed,
            expected: None,
            actual: None,
            note: Some(format!("not a valid lock: {}", reason.into())),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(note) = &self.note {
            return write!(f, " ({note})");
        }
        write!(
            f,
            " (expected {}, actual {})",
            self.expected.as_deref().unwrap_or("-"),
            self.actual.as_deref().unwrap_or("-")
        )
    }
}

/// Overall outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    /// Nothing was ever backed up; there is no lock to compare against.
    Unverifiable,
    /// The tree differs from the last commit; run `commit` first.
    Uncommitted,
    Corrupted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Good => "good",
            Verdict::Unverifiable => "unverifiable",
            Verdict::Uncommitted => "uncommitted",
            Verdict::Corrupted => "corrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationStatus {
    pub repo_integrity_ok: bool,
    pub repo_integrity_message: String,
    pub files_overall_ok: bool,
    pub file_errors: BTreeMap<String, FileError>,
    pub uncommitted_changes: bool,
    pub unverifiable: bool,
    pub auxiliary_ok: bool,
    pub auxiliary_errors: BTreeMap<String, String>,
}

impl Default for VerificationStatus {
    fn default() -> Self {
        Self {
            repo_integrity_ok: true,
            repo_integrity_message: String::new(),
            files_overall_ok: true,
            file_errors: BTreeMap::new(),
            uncommitted_changes: false,
            unverifiable: false,
            auxiliary_ok: true,
            auxiliary_errors: BTreeMap::new(),
        }
    }
}

impl VerificationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file_error(&mut self, path: impl Into<String>, error: FileError) {
        self.files_overall_ok = false;
        self.file_errors.insert(path.into(), error);
    }

    pub fn record_auxiliary_error(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.auxiliary_ok = false;
        self.auxiliary_errors.insert(name.into(), message.into());
    }

    pub fn record_integrity_failure(&mut self, message: impl Into<String>) {
        self.repo_integrity_ok = false;
        self.repo_integrity_message = message.into();
    }

    /// Record every difference between the locked digests and the live tree.
    pub fn compare(&mut self, expected: &Snapshot, actual: &Snapshot) {
        let changes = ChangeSet::between(expected, actual);
        for path in changes.added {
            let digest = actual.get(&path).cloned();
            self.record_file_error(path, FileError::new(FileErrorKind::Added, None, digest));
        }
        for path in changes.deleted {
            let digest = expected.get(&path).cloned();
            self.record_file_error(path, FileError::new(FileErrorKind::Removed, digest, None));
        }
        for path in changes.changed {
            let error = FileError::new(
                FileErrorKind::Changed,
                expected.get(&path).cloned(),
                actual.get(&path).cloned(),
            );
            self.record_file_error(path, error);
        }
    }

    /// Fold `other` into `self`, re-rooting its paths under `prefix`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: VerificationStatus) {
        let prefix = prefix.trim_end_matches('/');

        if !other.repo_integrity_ok {
            let message = if self.repo_integrity_message.is_empty() {
                other.repo_integrity_message
            } else {
                format!("{}\n{}", self.repo_integrity_message, other.repo_integrity_message)
            };
            self.record_integrity_failure(message);
        }
        for (path, error) in other.file_errors {
            self.record_file_error(format!("{prefix}{path}"), error);
        }
        for (name, message) in other.auxiliary_errors {
            self.record_auxiliary_error(name, message);
        }
        self.files_overall_ok &= other.files_overall_ok;
        self.auxiliary_ok &= other.auxiliary_ok;
        self.uncommitted_changes |= other.uncommitted_changes;
        self.unverifiable |= other.unverifiable;
    }

    pub fn verdict(&self) -> Verdict {
        if !self.repo_integrity_ok || !self.auxiliary_ok {
            Verdict::Corrupted
        } else if self.uncommitted_changes {
            Verdict::Uncommitted
        } else if self.unverifiable {
            Verdict::Unverifiable
        } else if !self.files_overall_ok || !self.file_errors.is_empty() {
            Verdict::Corrupted
        } else {
            Verdict::Good
        }
    }

    pub fn is_good(&self) -> bool {
        self.verdict() == Verdict::Good
    }

    /// Log every failure at the level an operator needs to act on it.
    pub fn log(&self) {
        if !self.repo_integrity_ok {
            error!("repository check failed: {}", self.repo_integrity_message);
        }
        if self.uncommitted_changes {
            warn!("uncommitted changes present, run 'keybank commit' before verifying");
        }
        if self.unverifiable {
            warn!("no lock file found, has a backup ever been run?");
        }
        for (path, err) in &self.file_errors {
            error!("{}: {}", path, err);
        }
        for (name, message) in &self.auxiliary_errors {
            error!("{}: {} keyring corrupted", name, message);
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "verdict: {}", self.verdict())?;
        if !self.repo_integrity_ok {
            writeln!(f, "repository: {}", self.repo_integrity_message)?;
        }
        for (path, err) in &self.file_errors {
            writeln!(f, "{path}: {err}")?;
        }
        for (name, message) in &self.auxiliary_errors {
            writeln!(f, "{name}: {message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(items: &[(&str, &str)]) -> Snapshot {
        items
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn test_default_is_good() {
        let status = VerificationStatus::new();
        assert!(status.is_good());
        assert_eq!(status.verdict(), Verdict::Good);
    }

    #[test]
    fn test_compare_records_expected_and_actual() {
        let mut status = VerificationStatus::new();
        status.compare(
            &snapshot(&[("/a", "1"), ("/b", "2")]),
            &snapshot(&[("/a", "9"), ("/c", "3")]),
        );

        let a = &status.file_errors["/a"];
        assert_eq!(a.kind, FileErrorKind::Changed);
        assert_eq!(a.expected.as_deref(), Some("1"));
        assert_eq!(a.actual.as_deref(), Some("9"));
        assert_eq!(status.file_errors["/b"].kind, FileErrorKind::Removed);
        assert_eq!(status.file_errors["/c"].kind, FileErrorKind::Added);
        assert!(!status.files_overall_ok);
        assert_eq!(status.verdict(), Verdict::Corrupted);
    }

    #[test]
    fn test_verdict_precedence() {
        let mut status = VerificationStatus::new();
        status.unverifiable = true;
        assert_eq!(status.verdict(), Verdict::Unverifiable);
        assert!(!status.is_good());

        status.uncommitted_changes = true;
        assert_eq!(status.verdict(), Verdict::Uncommitted);

        status.record_integrity_failure("dangling blob");
        assert_eq!(status.verdict(), Verdict::Corrupted);
    }

    #[test]
    fn test_auxiliary_error_is_corruption() {
        let mut status = VerificationStatus::new();
        status.record_auxiliary_error("alice", "private");
        assert!(!status.auxiliary_ok);
        assert_eq!(status.verdict(), Verdict::Corrupted);
    }

    #[test]
    fn test_merge_prefixed() {
        let mut scoped = VerificationStatus::new();
        scoped.record_file_error(
            "/id_rsa",
            FileError::new(FileErrorKind::Removed, Some("1".into()), None),
        );

        let mut all = VerificationStatus::new();
        all.merge_prefixed("/laptop", scoped);

        assert!(all.file_errors.contains_key("/laptop/id_rsa"));
        assert!(!all.files_overall_ok);
        assert!(all.repo_integrity_ok);
    }

    #[test]
    fn test_file_error_display() {
        let err = FileError::new(FileErrorKind::Changed, Some("aa".into()), Some("bb".into()));
        assert_eq!(err.to_string(), "changed (expected aa, actual bb)");
        assert!(FileError::invalid_lock("eof")
            .to_string()
            .contains("not a valid lock"));
    }
}

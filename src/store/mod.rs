//! # Stores
//!
//! A store exclusively owns one directory subtree of the keybank and, when it
//! is git-enabled, the repository at its root. Every variant exposes the same
//! lifecycle:
//!
//! | operation | archival | synchronized | machine-synchronized | gpg |
//! |-----------|----------|--------------|----------------------|-----|
//! | commit    | lock + git | lock + git | every scope lock + git | no-op |
//! | backup    | no-op    | manifest → tree | `_common` + machine scopes | warns, skips |
//! | restore   | no-op    | tree → directory | `_common` + machine scopes | exports subkeys |
//! | verify    | fsck + diff | fsck + diff | fsck + diff per scope | keyring listings |
//!
//! Stores are created once with `initialize` and reopened with `open`; they
//! never delete their own root.

pub mod archival;
pub mod gpg;
pub mod machine;
pub mod synchronized;
pub mod tree;

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::info;

use crate::changes::{ChangeDetector, ChangeSet};
use crate::error::{KeybankError, Result};
use crate::exec::{CommandRunner, SystemRunner};
use crate::git::{Author, GitRepo, VersionControl};
use crate::identity::{IdentityResolver, SystemIdentity};
use crate::integrity::RepositoryIntegrityChecker;
use crate::status::VerificationStatus;

pub use archival::ArchivalStore;
pub use gpg::GpgKeyringStore;
pub use machine::MachineSynchronizedStore;
pub use synchronized::SynchronizedStore;
pub use tree::LockedTree;

/// Message used when the operator gives none.
pub const DEFAULT_COMMIT_MESSAGE: &str = "update";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Archival,
    Synchronized,
    MachineSynchronized,
    Gpg,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreKind::Archival => "archival",
            StoreKind::Synchronized => "synchronized",
            StoreKind::MachineSynchronized => "machine-synchronized",
            StoreKind::Gpg => "gpg",
        };
        f.write_str(s)
    }
}

/// Arguments of one backup or restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    /// Source directory for backup, target directory for restore.
    pub directory: PathBuf,
    /// Machine scope to act on in addition to `_common`.
    pub machine: Option<String>,
    pub dry_run: bool,
}

impl StoreRequest {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            machine: None,
            dry_run: false,
        }
    }
}

/// Capabilities every store is built with.
#[derive(Clone)]
pub struct StoreContext {
    pub runner: Rc<dyn CommandRunner>,
    pub identity: Rc<dyn IdentityResolver>,
}

impl StoreContext {
    pub fn new(runner: Rc<dyn CommandRunner>, identity: Rc<dyn IdentityResolver>) -> Self {
        Self { runner, identity }
    }

    /// Real processes, real passwd/group databases.
    pub fn system() -> Self {
        Self::new(Rc::new(SystemRunner), Rc::new(SystemIdentity))
    }
}

pub trait Store {
    fn kind(&self) -> StoreKind;

    fn root(&self) -> &Path;

    /// Record the current tree as last known good and commit it.
    fn commit(&self, message: &str, dry_run: bool) -> Result<ChangeSet>;

    fn backup(&self, request: &StoreRequest) -> Result<()>;

    fn restore(&self, request: &StoreRequest) -> Result<()>;

    fn verify(&self) -> Result<VerificationStatus>;
}

/// Create a store root with owner-only permissions, refusing to reuse one.
pub(crate) fn create_root(root: &Path) -> Result<()> {
    match DirBuilder::new().mode(0o700).create(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if fs::read_dir(root)?.next().is_some() {
                Err(KeybankError::AlreadyInitialized(root.to_path_buf()))
            } else {
                Ok(())
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Commit the working tree unless the repository has nothing to record.
pub(crate) fn commit_repository(
    vcs: &dyn VersionControl,
    identity: &dyn IdentityResolver,
    message: &str,
) -> Result<()> {
    let pending = ChangeDetector::new(vcs).detect()?;
    if pending.is_empty() {
        info!("nothing to commit");
        return Ok(());
    }
    let author = Author::for_user(&identity.current_user()?);
    vcs.commit_all(message, &author)?;
    info!("committed {} change(s) as {}", pending.len(), author);
    Ok(())
}

/// Repository check first; status is only consulted on a healthy repository.
pub(crate) fn verify_repository(
    vcs: &dyn VersionControl,
    status: &mut VerificationStatus,
) -> Result<bool> {
    let report = RepositoryIntegrityChecker::new(vcs).check()?;
    if !report.ok {
        status.record_integrity_failure(report.message);
    }
    Ok(report.ok)
}

pub(crate) fn mark_uncommitted(vcs: &dyn VersionControl, status: &mut VerificationStatus) -> Result<()> {
    status.uncommitted_changes = ChangeDetector::new(vcs).has_uncommitted_changes()?;
    Ok(())
}

/// Initialize a repository at `root` and record the initial layout.
pub(crate) fn init_repository(root: &Path, ctx: &StoreContext) -> Result<GitRepo> {
    let repo = GitRepo::init(root, ctx.runner.clone())?;
    commit_repository(&repo, ctx.identity.as_ref(), "initialize")?;
    Ok(repo)
}

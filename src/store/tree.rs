//! The manifest/lock protocol over one directory tree.
//!
//! [`LockedTree`] knows nothing about git or manifests on disk: it hashes,
//! copies and compares files below its root against `manifest.lock.json`.
//! Every store variant is built from one or more of these.

use std::collections::HashSet;
use std::fs::{self, DirBuilder, File, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::changes::ChangeSet;
use crate::error::{KeybankError, Result};
use crate::hash::{self, hash_file, Snapshot};
use crate::identity::{IdentityResolver, Ownership};
use crate::lock::{LockedEntry, LockedManifest};
use crate::manifest::ManifestEntry;
use crate::select::{expand_home, relativize, resolve, select_all};
use crate::status::{FileError, VerificationStatus};

pub const LOCK_FILE: &str = "manifest.lock.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const GIT_DIR: &str = ".git";

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// Names owner and group to force on restored files, overriding what the
/// lock recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOverride<'a> {
    pub user: Option<&'a str>,
    pub group: Option<&'a str>,
}

impl OwnerOverride<'_> {
    fn is_set(&self) -> bool {
        self.user.is_some() || self.group.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct LockedTree {
    root: PathBuf,
    excludes: HashSet<String>,
}

impl LockedTree {
    /// A tree whose control files are the repository, manifest and lock.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_excludes(root, &[GIT_DIR, MANIFEST_FILE, LOCK_FILE])
    }

    pub fn with_excludes(root: impl Into<PathBuf>, control: &[&str]) -> Self {
        Self {
            root: root.into(),
            excludes: control.iter().map(|name| format!("/{name}")).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        if !self.root.is_dir() {
            return Ok(Snapshot::new());
        }
        hash::snapshot(&self.root, &self.excludes)
    }

    pub fn load_lock(&self) -> Result<LockedManifest> {
        LockedManifest::load(&self.lock_path())
    }

    /// Re-hash the tree and record it as the new lock.
    ///
    /// Returns the drift against the previous lock. With `dry_run` nothing is
    /// written.
    pub fn commit(&self, dry_run: bool) -> Result<ChangeSet> {
        let previous = self.load_lock()?;
        let current = self.snapshot()?;
        let changes = ChangeSet::between(&previous.digests(), &current);

        if dry_run {
            return Ok(changes);
        }

        let lock = LockedManifest::from_snapshot(&current).carry_ownership(&previous);
        if lock != previous || !self.lock_path().exists() {
            fs::create_dir_all(&self.root)?;
            lock.save(&self.lock_path())?;
        }
        Ok(changes)
    }

    /// Compare the live tree against the lock, recording every difference.
    pub fn verify_into(&self, status: &mut VerificationStatus) -> Result<()> {
        let lock = match self.load_lock() {
            Ok(lock) => lock,
            Err(KeybankError::Json(e)) => {
                status.record_file_error(format!("/{LOCK_FILE}"), FileError::invalid_lock(e.to_string()));
                return Ok(());
            }
            Err(KeybankError::Corruption(msg)) => {
                status.record_file_error(format!("/{LOCK_FILE}"), FileError::invalid_lock(msg));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let current = self.snapshot()?;
        if lock.is_empty() {
            // An empty tree with an empty lock has nothing to verify.
            status.unverifiable = !current.is_empty();
            return Ok(());
        }

        status.compare(&lock.digests(), &current);
        Ok(())
    }

    /// Whether `rel` names a control file or lies below a control directory.
    pub fn is_control(&self, rel: &str) -> bool {
        self.excludes
            .iter()
            .any(|control| rel == control || rel.starts_with(&format!("{control}/")))
    }

    /// Expand `entries` against `source`, refusing any file that would land
    /// on one of the tree's control files.
    pub fn select(&self, entries: &[ManifestEntry], source: &Path) -> Result<Vec<PathBuf>> {
        let files = select_all(entries, source)?;
        let base = expand_home(source);
        for file in &files {
            let rel = relativize(file, &base);
            if self.is_control(&rel) {
                return Err(KeybankError::Configuration(format!(
                    "{} would overwrite the control file {} in {}",
                    file.display(),
                    rel,
                    self.root.display()
                )));
            }
        }
        Ok(files)
    }

    /// Copy every file selected by `entries` from `source` into the tree.
    ///
    /// Selection happens first and fails as a whole; files in the tree that
    /// are no longer selected are removed afterwards.
    pub fn backup(
        &self,
        entries: &[ManifestEntry],
        source: &Path,
        identity: &dyn IdentityResolver,
        dry_run: bool,
    ) -> Result<LockedManifest> {
        let files = self.select(entries, source)?;
        let base = expand_home(source);

        let mut lock = LockedManifest::new();
        for file in &files {
            let rel = relativize(file, &base);
            let meta = fs::metadata(file)?;
            let entry = LockedEntry::with_ownership(
                hash_file(file)?,
                identity.user_name(meta.uid())?,
                identity.group_name(meta.gid())?,
            );
            let target = resolve(&self.root, &rel);

            if dry_run {
                info!("would copy {} -> {}", file.display(), target.display());
            } else {
                info!("copying {} -> {}", file.display(), target.display());
                create_private_dirs(target.parent().unwrap_or(&self.root))?;
                copy_secret(file, &target)?;
            }
            lock.insert(rel, entry);
        }

        self.reconcile(&lock, dry_run)?;

        if !dry_run {
            fs::create_dir_all(&self.root)?;
            lock.save(&self.lock_path())?;
            for line in lock.to_json()?.lines() {
                debug!("{}", line);
            }
        }
        Ok(lock)
    }

    /// Remove tracked files that `lock` no longer lists.
    fn reconcile(&self, lock: &LockedManifest, dry_run: bool) -> Result<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        for (rel, path) in hash::tracked_files(&self.root, &self.excludes)? {
            if lock.contains(&rel) {
                continue;
            }
            if dry_run {
                info!("would remove {}", path.display());
                continue;
            }
            info!("removing {}", path.display());
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Copy every locked file from the tree to `target`.
    ///
    /// Ownership names are resolved for every entry before the first copy.
    pub fn restore(
        &self,
        target: &Path,
        identity: &dyn IdentityResolver,
        owner: OwnerOverride<'_>,
        dry_run: bool,
    ) -> Result<()> {
        let lock = self.load_lock()?;
        let base = expand_home(target);

        let forced = Ownership::resolve(identity, owner.user, owner.group)?;
        let mut plan = Vec::with_capacity(lock.len());
        for (rel, entry) in lock.iter() {
            let ownership = if owner.is_set() {
                forced
            } else {
                Ownership::resolve(identity, entry.owner.as_deref(), entry.group.as_deref())?
            };
            plan.push((rel, ownership));
        }

        for (rel, ownership) in plan {
            let source = resolve(&self.root, rel);
            let destination = resolve(&base, rel);

            if dry_run {
                info!("would restore {} -> {}", source.display(), destination.display());
                continue;
            }

            info!("restoring {} -> {}", source.display(), destination.display());
            if let Some(parent) = destination.parent() {
                for dir in create_private_dirs(parent)? {
                    if owner.is_set() {
                        forced.apply(&dir)?;
                    }
                }
                if owner.is_set() {
                    for dir in dirs_below(&base, parent) {
                        fs::set_permissions(dir, Permissions::from_mode(DIR_MODE))?;
                        forced.apply(dir)?;
                    }
                }
            }
            copy_secret(&source, &destination)?;
            ownership.apply(&destination)?;
        }
        Ok(())
    }
}

/// Create `dir` and any missing ancestors with owner-only permissions.
/// Returns the directories that were created, outermost first.
pub(crate) fn create_private_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let missing: Vec<PathBuf> = dir
        .ancestors()
        .take_while(|d| !d.as_os_str().is_empty() && !d.exists())
        .map(Path::to_path_buf)
        .collect();

    let mut builder = DirBuilder::new();
    builder.mode(DIR_MODE);
    for d in missing.iter().rev() {
        match builder.create(d) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        fs::set_permissions(d, Permissions::from_mode(DIR_MODE))?;
    }
    Ok(missing.into_iter().rev().collect())
}

/// `dir` and its ancestors strictly below `base`.
fn dirs_below<'a>(base: &'a Path, dir: &'a Path) -> impl Iterator<Item = &'a Path> {
    dir.ancestors()
        .take_while(move |d| *d != base && d.starts_with(base))
}

/// Copy one file, keep its modification time, and make it owner-only.
pub(crate) fn copy_secret(source: &Path, destination: &Path) -> Result<()> {
    let modified = fs::metadata(source)?.modified()?;
    // A read-only destination would refuse the copy.
    match fs::remove_file(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::copy(source, destination)?;
    fs::set_permissions(destination, Permissions::from_mode(FILE_MODE))?;
    File::options()
        .write(true)
        .open(destination)?
        .set_modified(modified)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::identity::fake::{FakeIdentity, GROUP, USER};
    use crate::status::{FileErrorKind, Verdict};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn entry(path: &str, amount: usize) -> ManifestEntry {
        ManifestEntry {
            path: path.into(),
            amount,
        }
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = resolve(root, rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    struct Fixture {
        _temp: TempDir,
        source: PathBuf,
        tree: LockedTree,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        let store = temp.path().join("store");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&store).unwrap();
        Fixture {
            tree: LockedTree::new(&store),
            source,
            _temp: temp,
        }
    }

    #[test]
    fn test_backup_scenario_ssh_host_keys() {
        let fx = fixture();
        write(&fx.source, "/etc/ssh/ssh_host_a_key", "a");
        write(&fx.source, "/etc/ssh/ssh_host_b_key", "b");

        let entries = [entry("/etc/ssh/ssh_host_*_key", 2)];
        fx.tree
            .backup(&entries, &fx.source, &FakeIdentity, false)
            .unwrap();

        let lock = fx.tree.load_lock().unwrap();
        let digests = lock.digests();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests["/etc/ssh/ssh_host_a_key"], hash_bytes(b"a"));
        assert_eq!(digests["/etc/ssh/ssh_host_b_key"], hash_bytes(b"b"));

        let a = lock.get("/etc/ssh/ssh_host_a_key").unwrap();
        assert_eq!(a.owner.as_deref(), Some(USER));
        assert_eq!(a.group.as_deref(), Some(GROUP));

        let copied = fx.tree.root().join("etc/ssh/ssh_host_a_key");
        assert_eq!(fs::read_to_string(&copied).unwrap(), "a");
        assert_eq!(fs::metadata(&copied).unwrap().mode() & 0o777, 0o600);
        assert_eq!(
            fs::metadata(fx.tree.root().join("etc/ssh")).unwrap().mode() & 0o777,
            0o700
        );
    }

    #[test]
    fn test_backup_preserves_mtime() {
        let fx = fixture();
        let source = write(&fx.source, "/key", "k");
        let past = SystemTime::now() - Duration::from_secs(86_400);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(past)
            .unwrap();

        fx.tree
            .backup(&[entry("/key", 1)], &fx.source, &FakeIdentity, false)
            .unwrap();

        let copied = fs::metadata(fx.tree.root().join("key")).unwrap();
        assert_eq!(
            copied.modified().unwrap(),
            fs::metadata(&source).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_backup_count_mismatch_touches_nothing() {
        let fx = fixture();
        write(&fx.source, "/secret1", "1");
        write(&fx.source, "/other", "o");

        fx.tree
            .backup(&[entry("/other", 1)], &fx.source, &FakeIdentity, false)
            .unwrap();
        let before = fs::read(fx.tree.lock_path()).unwrap();

        let result = fx.tree.backup(
            &[entry("/other", 1), entry("/secret*", 2)],
            &fx.source,
            &FakeIdentity,
            false,
        );
        assert!(matches!(result, Err(KeybankError::CountMismatch { .. })));
        assert!(!fx.tree.root().join("secret1").exists());
        assert_eq!(fs::read(fx.tree.lock_path()).unwrap(), before);
    }

    #[test]
    fn test_backup_reconciles_removed_sources() {
        let fx = fixture();
        write(&fx.source, "/keep", "k");
        write(&fx.source, "/drop", "d");

        fx.tree
            .backup(
                &[entry("/keep", 1), entry("/drop", 1)],
                &fx.source,
                &FakeIdentity,
                false,
            )
            .unwrap();
        assert!(fx.tree.root().join("drop").exists());

        fx.tree
            .backup(&[entry("/keep", 1)], &fx.source, &FakeIdentity, false)
            .unwrap();
        assert!(!fx.tree.root().join("drop").exists());
        assert!(fx.tree.root().join("keep").exists());
        assert!(!fx.tree.load_lock().unwrap().contains("/drop"));
    }

    #[test]
    fn test_backup_dry_run_mutates_nothing() {
        let fx = fixture();
        write(&fx.source, "/key", "k");
        write(fx.tree.root(), "/stale", "s");

        let lock = fx
            .tree
            .backup(&[entry("/key", 1)], &fx.source, &FakeIdentity, true)
            .unwrap();

        assert!(lock.contains("/key"));
        assert!(!fx.tree.root().join("key").exists());
        assert!(fx.tree.root().join("stale").exists());
        assert!(!fx.tree.lock_path().exists());
    }

    #[test]
    fn test_commit_is_idempotent() {
        let fx = fixture();
        write(fx.tree.root(), "/a", "a");

        let first = fx.tree.commit(false).unwrap();
        assert_eq!(first.added.len(), 1);
        let lock = fs::read(fx.tree.lock_path()).unwrap();

        let second = fx.tree.commit(false).unwrap();
        assert!(second.is_empty());
        assert_eq!(fs::read(fx.tree.lock_path()).unwrap(), lock);
    }

    #[test]
    fn test_commit_dry_run_leaves_lock() {
        let fx = fixture();
        write(fx.tree.root(), "/a", "a");

        let changes = fx.tree.commit(true).unwrap();
        assert_eq!(changes.added.len(), 1);
        assert!(!fx.tree.lock_path().exists());
    }

    #[test]
    fn test_verify_reports_expected_and_actual() {
        let fx = fixture();
        write(fx.tree.root(), "/a", "before");
        fx.tree.commit(false).unwrap();
        write(fx.tree.root(), "/a", "after");

        let mut status = VerificationStatus::new();
        fx.tree.verify_into(&mut status).unwrap();

        let err = &status.file_errors["/a"];
        assert_eq!(err.kind, FileErrorKind::Changed);
        assert_eq!(err.expected, Some(hash_bytes(b"before")));
        assert_eq!(err.actual, Some(hash_bytes(b"after")));
    }

    #[test]
    fn test_verify_without_lock_is_unverifiable() {
        let fx = fixture();
        write(fx.tree.root(), "/placed-by-hand", "x");

        let mut status = VerificationStatus::new();
        fx.tree.verify_into(&mut status).unwrap();
        assert_eq!(status.verdict(), Verdict::Unverifiable);
        assert!(status.file_errors.is_empty());
    }

    #[test]
    fn test_verify_empty_tree_without_lock_is_good() {
        let fx = fixture();
        let mut status = VerificationStatus::new();
        fx.tree.verify_into(&mut status).unwrap();
        assert!(status.is_good());
    }

    #[test]
    fn test_verify_invalid_lock_is_file_error() {
        let fx = fixture();
        fs::write(fx.tree.lock_path(), "{not json").unwrap();

        let mut status = VerificationStatus::new();
        fx.tree.verify_into(&mut status).unwrap();

        let err = &status.file_errors["/manifest.lock.json"];
        assert!(err.note.as_deref().unwrap().contains("not a valid lock"));
        assert!(!status.is_good());
    }

    #[test]
    fn test_restore_copies_with_ownership() {
        let fx = fixture();
        write(&fx.source, "/.ssh/id_ed25519", "private");
        fx.tree
            .backup(&[entry("/.ssh/*", 1)], &fx.source, &FakeIdentity, false)
            .unwrap();

        let target = fx.source.parent().unwrap().join("target");
        fx.tree
            .restore(&target, &FakeIdentity, OwnerOverride::default(), false)
            .unwrap();

        let restored = target.join(".ssh/id_ed25519");
        assert_eq!(fs::read_to_string(&restored).unwrap(), "private");
        let meta = fs::metadata(&restored).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o600);
        assert_eq!(meta.uid(), nix::unistd::getuid().as_raw());
    }

    #[test]
    fn test_restore_unknown_owner_writes_nothing() {
        let fx = fixture();
        write(fx.tree.root(), "/a", "a");
        write(fx.tree.root(), "/b", "b");

        let mut lock = LockedManifest::new();
        lock.insert("/a".into(), LockedEntry::with_ownership(hash_bytes(b"a"), USER.into(), GROUP.into()));
        lock.insert("/b".into(), LockedEntry::with_ownership(hash_bytes(b"b"), "ghost".into(), GROUP.into()));
        lock.save(&fx.tree.lock_path()).unwrap();

        let target = fx.source.parent().unwrap().join("target");
        let result = fx
            .tree
            .restore(&target, &FakeIdentity, OwnerOverride::default(), false);

        assert!(matches!(result, Err(KeybankError::Identity(_))));
        assert!(!target.exists());
    }

    #[test]
    fn test_restore_override_owner_and_private_dirs() {
        let fx = fixture();
        write(fx.tree.root(), "/deep/dir/key", "k");
        fx.tree.commit(false).unwrap();

        let target = fx.source.parent().unwrap().join("target");
        let owner = OwnerOverride {
            user: Some(USER),
            group: Some(GROUP),
        };
        fx.tree.restore(&target, &FakeIdentity, owner, false).unwrap();

        for dir in [target.clone(), target.join("deep"), target.join("deep/dir")] {
            assert_eq!(fs::metadata(&dir).unwrap().mode() & 0o777, 0o700);
        }
        assert_eq!(
            fs::metadata(target.join("deep/dir/key")).unwrap().mode() & 0o777,
            0o600
        );
    }

    #[test]
    fn test_restore_tightens_existing_dirs_below_target() {
        let fx = fixture();
        write(fx.tree.root(), "/.ssh/id_ed25519", "k");
        fx.tree.commit(false).unwrap();

        let target = fx.source.parent().unwrap().join("home");
        fs::create_dir_all(target.join(".ssh")).unwrap();
        fs::set_permissions(&target, Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(target.join(".ssh"), Permissions::from_mode(0o755)).unwrap();

        let owner = OwnerOverride {
            user: Some(USER),
            group: Some(GROUP),
        };
        fx.tree.restore(&target, &FakeIdentity, owner, false).unwrap();

        assert_eq!(fs::metadata(target.join(".ssh")).unwrap().mode() & 0o777, 0o700);
        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_restore_without_owner_keeps_existing_dirs() {
        let fx = fixture();
        write(fx.tree.root(), "/etc/ssh/ssh_host_a_key", "a");
        fx.tree.commit(false).unwrap();

        let target = fx.source.parent().unwrap().join("root");
        fs::create_dir_all(target.join("etc/ssh")).unwrap();
        fs::set_permissions(target.join("etc"), Permissions::from_mode(0o755)).unwrap();

        fx.tree
            .restore(&target, &FakeIdentity, OwnerOverride::default(), false)
            .unwrap();
        assert_eq!(fs::metadata(target.join("etc")).unwrap().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_restore_replaces_read_only_file() {
        let fx = fixture();
        write(fx.tree.root(), "/key", "new");
        fx.tree.commit(false).unwrap();

        let target = fx.source.parent().unwrap().join("target");
        let existing = write(&target, "/key", "old");
        fs::set_permissions(&existing, Permissions::from_mode(0o400)).unwrap();

        fx.tree
            .restore(&target, &FakeIdentity, OwnerOverride::default(), false)
            .unwrap();
        assert_eq!(fs::read_to_string(&existing).unwrap(), "new");
        assert_eq!(fs::metadata(&existing).unwrap().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_backup_refuses_control_files() {
        let fx = fixture();
        write(&fx.source, "/manifest.json", "not a manifest");
        write(&fx.source, "/.git/config", "[core]");
        write(fx.tree.root(), "/manifest.json", "[]");

        for pattern in ["/manifest.json", "/.git/config"] {
            let err = fx
                .tree
                .backup(&[entry(pattern, 1)], &fx.source, &FakeIdentity, false)
                .unwrap_err();
            assert!(matches!(err, KeybankError::Configuration(_)), "{pattern}");
        }
        assert_eq!(
            fs::read_to_string(fx.tree.root().join("manifest.json")).unwrap(),
            "[]"
        );
        assert!(!fx.tree.lock_path().exists());
    }

    #[test]
    fn test_is_control() {
        let tree = LockedTree::new("/store");
        assert!(tree.is_control("/manifest.lock.json"));
        assert!(tree.is_control("/.git/HEAD"));
        assert!(!tree.is_control("/.gitconfig"));
        assert!(!tree.is_control("/etc/manifest.json"));
    }

    #[test]
    fn test_restore_dry_run() {
        let fx = fixture();
        write(fx.tree.root(), "/a", "a");
        fx.tree.commit(false).unwrap();

        let target = fx.source.parent().unwrap().join("target");
        fx.tree
            .restore(&target, &FakeIdentity, OwnerOverride::default(), true)
            .unwrap();
        assert!(!target.exists());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use crate::changes::ChangeSet;
use crate::error::{KeybankError, Result};
use crate::git::GitRepo;
use crate::manifest::{Manifest, Scope};
use crate::status::VerificationStatus;

use super::tree::{LockedTree, OwnerOverride, MANIFEST_FILE};
use super::{
    commit_repository, create_root, init_repository, mark_uncommitted, verify_repository, Store,
    StoreContext, StoreKind, StoreRequest,
};

/// Manifest-driven copy of files from one machine.
///
/// Opened from disk it owns `manifest.json` and a repository. As one scope of
/// a [`MachineSynchronizedStore`](super::MachineSynchronizedStore) it is
/// handed its scope directly and has no repository of its own.
pub struct SynchronizedStore {
    tree: LockedTree,
    source: ScopeSource,
    repo: Option<GitRepo>,
    ctx: StoreContext,
}

enum ScopeSource {
    File(PathBuf),
    Scope(Scope),
}

impl SynchronizedStore {
    pub fn initialize(root: &Path, ctx: StoreContext) -> Result<Self> {
        create_root(root)?;
        fs::write(root.join(MANIFEST_FILE), "[]\n")?;
        let tree = LockedTree::new(root);
        tree.commit(false)?;
        let repo = init_repository(root, &ctx)?;
        Ok(Self {
            tree,
            source: ScopeSource::File(root.join(MANIFEST_FILE)),
            repo: Some(repo),
            ctx,
        })
    }

    pub fn open(root: &Path, ctx: StoreContext) -> Result<Self> {
        let manifest = root.join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(KeybankError::NotInitialized(root.to_path_buf()));
        }
        let repo = GitRepo::open(root, ctx.runner.clone())?;
        Ok(Self {
            tree: LockedTree::new(root),
            source: ScopeSource::File(manifest),
            repo: Some(repo),
            ctx,
        })
    }

    /// A repository-less store for one scope, rooted at `root`.
    pub fn for_scope(root: &Path, scope: Scope, ctx: StoreContext) -> Self {
        Self {
            tree: LockedTree::new(root),
            source: ScopeSource::Scope(scope),
            repo: None,
            ctx,
        }
    }

    pub fn scope(&self) -> Result<Scope> {
        match &self.source {
            ScopeSource::File(path) => Ok(Manifest::load(path)?.common().clone()),
            ScopeSource::Scope(scope) => Ok(scope.clone()),
        }
    }

    pub(crate) fn tree(&self) -> &LockedTree {
        &self.tree
    }
}

impl Store for SynchronizedStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Synchronized
    }

    fn root(&self) -> &Path {
        self.tree.root()
    }

    fn commit(&self, message: &str, dry_run: bool) -> Result<ChangeSet> {
        let changes = self.tree.commit(dry_run)?;
        if let (Some(repo), false) = (&self.repo, dry_run) {
            commit_repository(repo, self.ctx.identity.as_ref(), message)?;
        }
        Ok(changes)
    }

    fn backup(&self, request: &StoreRequest) -> Result<()> {
        let scope = self.scope()?;
        self.tree.backup(
            &scope.entries,
            scope.directory(&request.directory),
            self.ctx.identity.as_ref(),
            request.dry_run,
        )?;
        Ok(())
    }

    fn restore(&self, request: &StoreRequest) -> Result<()> {
        let scope = self.scope()?;
        let owner = OwnerOverride {
            user: scope.user.as_deref(),
            group: scope.group.as_deref(),
        };
        self.tree.restore(
            scope.directory(&request.directory),
            self.ctx.identity.as_ref(),
            owner,
            request.dry_run,
        )
    }

    fn verify(&self) -> Result<VerificationStatus> {
        let mut status = VerificationStatus::new();
        let healthy = match &self.repo {
            Some(repo) => verify_repository(repo, &mut status)?,
            None => false,
        };
        self.tree.verify_into(&mut status)?;
        if let (Some(repo), true) = (&self.repo, healthy) {
            mark_uncommitted(repo, &mut status)?;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::identity::fake::{GROUP, USER};
    use crate::status::Verdict;
    use crate::store::testing::{context, write};
    use crate::store::tree::LOCK_FILE;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        store: SynchronizedStore,
    }

    impl Fixture {
        fn source(&self) -> PathBuf {
            self.temp.path().join("source")
        }

        fn request(&self) -> StoreRequest {
            StoreRequest::new(self.source())
        }

        fn manifest(&self, text: &str) {
            fs::write(self.store.root().join(MANIFEST_FILE), text).unwrap();
        }
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("source")).unwrap();
        let store = SynchronizedStore::initialize(&temp.path().join("generic"), context()).unwrap();
        Fixture { temp, store }
    }

    #[test]
    fn test_initialize_writes_flat_manifest() {
        let fx = fixture();
        assert_eq!(
            fs::read_to_string(fx.store.root().join(MANIFEST_FILE)).unwrap(),
            "[]\n"
        );
        assert!(fx.store.root().join(".git").is_dir());
        assert!(SynchronizedStore::open(fx.store.root(), context()).is_ok());
    }

    #[test]
    fn test_backup_commit_verify_cycle() {
        let fx = fixture();
        write(&fx.source(), "/etc/ssh/ssh_host_a_key", "a");
        write(&fx.source(), "/etc/ssh/ssh_host_b_key", "b");
        fx.manifest(r#"[{"path": "/etc/ssh/ssh_host_*_key", "amount": 2}]"#);

        fx.store.backup(&fx.request()).unwrap();
        let lock = fx.store.tree().load_lock().unwrap();
        assert_eq!(lock.get("/etc/ssh/ssh_host_a_key").unwrap().hash, hash_bytes(b"a"));
        assert_eq!(lock.get("/etc/ssh/ssh_host_b_key").unwrap().hash, hash_bytes(b"b"));

        assert_eq!(fx.store.verify().unwrap().verdict(), Verdict::Uncommitted);

        let changes = fx.store.commit("update", false).unwrap();
        assert!(changes.is_empty(), "backup already wrote the lock: {changes}");
        assert!(fx.store.verify().unwrap().is_good());

        let lock_text = fs::read(fx.store.root().join(LOCK_FILE)).unwrap();
        assert!(fx.store.commit("update", false).unwrap().is_empty());
        assert_eq!(fs::read(fx.store.root().join(LOCK_FILE)).unwrap(), lock_text);
    }

    #[test]
    fn test_backup_count_mismatch_leaves_lock() {
        let fx = fixture();
        write(&fx.source(), "/secret1", "1");
        fx.manifest(r#"[{"path": "/secret*", "amount": 2}]"#);
        let before = fs::read(fx.store.root().join(LOCK_FILE)).unwrap();

        let err = fx.store.backup(&fx.request()).unwrap_err();
        assert!(matches!(err, KeybankError::CountMismatch { .. }));
        assert!(!fx.store.root().join("secret1").exists());
        assert_eq!(fs::read(fx.store.root().join(LOCK_FILE)).unwrap(), before);
    }

    #[test]
    fn test_restore_roundtrip() {
        let fx = fixture();
        write(&fx.source(), "/.gnupg/gpg.conf", "use-agent");
        fx.manifest(r#"[{"path": "/.gnupg/gpg.conf", "amount": 1}]"#);
        fx.store.backup(&fx.request()).unwrap();

        let target = fx.temp.path().join("target");
        fx.store.restore(&StoreRequest::new(&target)).unwrap();

        let restored = target.join(".gnupg/gpg.conf");
        assert_eq!(fs::read_to_string(&restored).unwrap(), "use-agent");
        assert_eq!(fs::metadata(&restored).unwrap().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_scope_directory_wins_over_request() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("home");
        write(&home, "/.ssh/id_ed25519", "key");

        let mut scope = Scope::new(
            "laptop",
            vec![crate::manifest::ManifestEntry {
                path: "/.ssh/id_ed25519".into(),
                amount: 1,
            }],
        );
        scope.from_directory = Some(home.clone());
        scope.user = Some(USER.into());
        scope.group = Some(GROUP.into());

        let store = SynchronizedStore::for_scope(&temp.path().join("laptop"), scope, context());
        store
            .backup(&StoreRequest::new(temp.path().join("elsewhere")))
            .unwrap();
        assert!(store.root().join(".ssh/id_ed25519").is_file());

        fs::remove_file(home.join(".ssh/id_ed25519")).unwrap();
        store
            .restore(&StoreRequest::new(temp.path().join("elsewhere")))
            .unwrap();
        assert!(home.join(".ssh/id_ed25519").is_file());
        assert!(!temp.path().join("elsewhere").exists());
    }

    #[test]
    fn test_scoped_store_without_repository_verifies_files() {
        let temp = TempDir::new().unwrap();
        let store = SynchronizedStore::for_scope(
            &temp.path().join("scope"),
            Scope::new("_common", Vec::new()),
            context(),
        );
        write(store.root(), "/a", "a");
        store.commit("update", false).unwrap();

        let status = store.verify().unwrap();
        assert!(status.is_good(), "{status}");
        assert!(!store.root().join(".git").exists());
    }
}

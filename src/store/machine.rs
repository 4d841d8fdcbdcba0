use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::changes::ChangeSet;
use crate::error::{KeybankError, Result};
use crate::git::GitRepo;
use crate::identity::Ownership;
use crate::manifest::{Manifest, ManifestShape, Scope, COMMON_SCOPE};
use crate::status::VerificationStatus;

use super::synchronized::SynchronizedStore;
use super::tree::MANIFEST_FILE;
use super::{
    commit_repository, create_root, init_repository, mark_uncommitted, verify_repository, Store,
    StoreContext, StoreKind, StoreRequest,
};

const INITIAL_MANIFEST: &str = "{\n    \"_common\": {\n        \"files\": []\n    }\n}\n";

/// Files shared by every machine (`_common`) plus per-machine scopes.
///
/// Each scope is a [`SynchronizedStore`] rooted at `<root>/<scope>/` with its
/// own lock file; the single repository lives at `<root>`.
pub struct MachineSynchronizedStore {
    root: PathBuf,
    repo: GitRepo,
    ctx: StoreContext,
}

impl MachineSynchronizedStore {
    pub fn initialize(root: &Path, ctx: StoreContext) -> Result<Self> {
        create_root(root)?;
        fs::write(root.join(MANIFEST_FILE), INITIAL_MANIFEST)?;
        let store = Self {
            root: root.to_path_buf(),
            repo: init_repository(root, &ctx)?,
            ctx,
        };
        Ok(store)
    }

    pub fn open(root: &Path, ctx: StoreContext) -> Result<Self> {
        if !root.join(MANIFEST_FILE).is_file() {
            return Err(KeybankError::NotInitialized(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            repo: GitRepo::open(root, ctx.runner.clone())?,
            ctx,
        })
    }

    pub fn manifest(&self) -> Result<Manifest> {
        let manifest = Manifest::load(&self.root.join(MANIFEST_FILE))?;
        if manifest.shape() != ManifestShape::Scoped {
            return Err(KeybankError::Configuration(format!(
                "{} must map scope names to file lists",
                self.root.join(MANIFEST_FILE).display()
            )));
        }
        Ok(manifest)
    }

    /// The sub-store holding `scope`.
    pub fn scope_store(&self, scope: &Scope) -> SynchronizedStore {
        SynchronizedStore::for_scope(&self.root.join(&scope.name), scope.clone(), self.ctx.clone())
    }

    /// Scopes a backup or restore acts on, with every precondition checked:
    /// the machine exists and every scope owner resolves.
    fn plan<'m>(&self, manifest: &'m Manifest, request: &StoreRequest) -> Result<Vec<&'m Scope>> {
        let scopes = manifest.scopes_for(request.machine.as_deref())?;
        for scope in &scopes {
            Ownership::resolve(
                self.ctx.identity.as_ref(),
                scope.user.as_deref(),
                scope.group.as_deref(),
            )?;
        }
        Ok(scopes)
    }
}

impl Store for MachineSynchronizedStore {
    fn kind(&self) -> StoreKind {
        StoreKind::MachineSynchronized
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn commit(&self, message: &str, dry_run: bool) -> Result<ChangeSet> {
        let manifest = self.manifest()?;
        let mut changes = ChangeSet::default();
        for scope in manifest.scopes() {
            if !self.root.join(&scope.name).is_dir() {
                continue;
            }
            let scoped = self.scope_store(scope).commit(message, dry_run)?;
            changes.extend_prefixed(&format!("/{}", scope.name), scoped);
        }
        if !dry_run {
            commit_repository(&self.repo, self.ctx.identity.as_ref(), message)?;
        }
        Ok(changes)
    }

    fn backup(&self, request: &StoreRequest) -> Result<()> {
        let manifest = self.manifest()?;
        let scopes = self.plan(&manifest, request)?;

        for scope in &scopes {
            self.scope_store(scope)
                .tree()
                .select(&scope.entries, scope.directory(&request.directory))?;
        }
        for scope in scopes {
            info!("backing up scope {}", scope.name);
            self.scope_store(scope).backup(request)?;
        }
        Ok(())
    }

    fn restore(&self, request: &StoreRequest) -> Result<()> {
        let manifest = self.manifest()?;
        for scope in self.plan(&manifest, request)? {
            info!("restoring scope {}", scope.name);
            self.scope_store(scope).restore(request)?;
        }
        Ok(())
    }

    fn verify(&self) -> Result<VerificationStatus> {
        let manifest = self.manifest()?;
        let mut status = VerificationStatus::new();
        let healthy = verify_repository(&self.repo, &mut status)?;

        for scope in manifest.scopes() {
            if scope.name != COMMON_SCOPE && !self.root.join(&scope.name).exists() {
                info!("scope {} has never been backed up here", scope.name);
                continue;
            }
            let scoped = self.scope_store(scope).verify()?;
            status.merge_prefixed(&format!("/{}", scope.name), scoped);
        }

        if healthy {
            mark_uncommitted(&self.repo, &mut status)?;
        }
        Ok(status)
    }
}

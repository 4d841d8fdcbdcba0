use std::path::Path;

use tracing::info;

use crate::changes::ChangeSet;
use crate::error::Result;
use crate::git::GitRepo;
use crate::status::VerificationStatus;

use super::tree::{LockedTree, GIT_DIR, LOCK_FILE};
use super::{
    commit_repository, create_root, init_repository, mark_uncommitted, verify_repository, Store,
    StoreContext, StoreKind, StoreRequest,
};

/// Files the operator places by hand, locked and committed as they are.
pub struct ArchivalStore {
    tree: LockedTree,
    repo: GitRepo,
    ctx: StoreContext,
}

impl ArchivalStore {
    pub fn initialize(root: &Path, ctx: StoreContext) -> Result<Self> {
        create_root(root)?;
        let tree = LockedTree::with_excludes(root, &[GIT_DIR, LOCK_FILE]);
        tree.commit(false)?;
        let repo = init_repository(root, &ctx)?;
        Ok(Self { tree, repo, ctx })
    }

    pub fn open(root: &Path, ctx: StoreContext) -> Result<Self> {
        let repo = GitRepo::open(root, ctx.runner.clone())?;
        Ok(Self {
            tree: LockedTree::with_excludes(root, &[GIT_DIR, LOCK_FILE]),
            repo,
            ctx,
        })
    }
}

impl Store for ArchivalStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Archival
    }

    fn root(&self) -> &Path {
        self.tree.root()
    }

    fn commit(&self, message: &str, dry_run: bool) -> Result<ChangeSet> {
        let changes = self.tree.commit(dry_run)?;
        if !dry_run {
            commit_repository(&self.repo, self.ctx.identity.as_ref(), message)?;
        }
        Ok(changes)
    }

    fn backup(&self, _request: &StoreRequest) -> Result<()> {
        info!(
            "archival store has no backup defined, place files in {} and commit",
            self.root().display()
        );
        Ok(())
    }

    fn restore(&self, _request: &StoreRequest) -> Result<()> {
        info!(
            "archival store has no restore defined, copy files from {} by hand",
            self.root().display()
        );
        Ok(())
    }

    fn verify(&self) -> Result<VerificationStatus> {
        let mut status = VerificationStatus::new();
        let healthy = verify_repository(&self.repo, &mut status)?;
        self.tree.verify_into(&mut status)?;
        if healthy {
            mark_uncommitted(&self.repo, &mut status)?;
        }
        Ok(status)
    }
}

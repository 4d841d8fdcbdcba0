//! # Keybank Layout
//!
//! A keybank is the root of a mounted, decrypted volume:
//!
//! ```text
//! <root>/
//! ├── archival/       ArchivalStore, files placed by hand
//! ├── generic/        SynchronizedStore, flat manifest
//! ├── synchronized/   MachineSynchronizedStore, scoped manifest
//! └── gpg/            GpgKeyringStore, one keyring home per directory
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::changes::ChangeSet;
use crate::error::{KeybankError, Result};
use crate::status::VerificationStatus;
use crate::store::{
    ArchivalStore, GpgKeyringStore, MachineSynchronizedStore, Store, StoreContext, StoreRequest,
    SynchronizedStore,
};

pub const ARCHIVAL: &str = "archival";
pub const GENERIC: &str = "generic";
pub const SYNCHRONIZED: &str = "synchronized";
pub const GPG: &str = "gpg";

pub struct Keybank {
    root: PathBuf,
    archival: Option<ArchivalStore>,
    generic: Option<SynchronizedStore>,
    synchronized: Option<MachineSynchronizedStore>,
    gpg: Option<GpgKeyringStore>,
}

impl Keybank {
    /// Lay out every store below `root`.
    pub fn create(root: &Path, ctx: StoreContext) -> Result<Self> {
        info!("initializing keybank at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            archival: Some(ArchivalStore::initialize(&root.join(ARCHIVAL), ctx.clone())?),
            generic: Some(SynchronizedStore::initialize(&root.join(GENERIC), ctx.clone())?),
            synchronized: Some(MachineSynchronizedStore::initialize(
                &root.join(SYNCHRONIZED),
                ctx.clone(),
            )?),
            gpg: Some(GpgKeyringStore::initialize(&root.join(GPG), ctx)?),
        })
    }

    /// Open the stores present below `root`.
    pub fn open(root: &Path, ctx: StoreContext) -> Result<Self> {
        if !root.is_dir() {
            return Err(KeybankError::NotInitialized(root.to_path_buf()));
        }
        let present = |name: &str| root.join(name).is_dir();

        let keybank = Self {
            root: root.to_path_buf(),
            archival: present(ARCHIVAL)
                .then(|| ArchivalStore::open(&root.join(ARCHIVAL), ctx.clone()))
                .transpose()?,
            generic: present(GENERIC)
                .then(|| SynchronizedStore::open(&root.join(GENERIC), ctx.clone()))
                .transpose()?,
            synchronized: present(SYNCHRONIZED)
                .then(|| MachineSynchronizedStore::open(&root.join(SYNCHRONIZED), ctx.clone()))
                .transpose()?,
            gpg: present(GPG)
                .then(|| GpgKeyringStore::open(&root.join(GPG), ctx.clone()))
                .transpose()?,
        };

        if keybank.stores().is_empty() {
            return Err(KeybankError::NotInitialized(root.to_path_buf()));
        }
        Ok(keybank)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every store present, by directory name.
    pub fn stores(&self) -> Vec<(&'static str, &dyn Store)> {
        let mut stores: Vec<(&'static str, &dyn Store)> = Vec::new();
        if let Some(s) = &self.archival {
            stores.push((ARCHIVAL, s));
        }
        if let Some(s) = &self.generic {
            stores.push((GENERIC, s));
        }
        if let Some(s) = &self.synchronized {
            stores.push((SYNCHRONIZED, s));
        }
        if let Some(s) = &self.gpg {
            stores.push((GPG, s));
        }
        stores
    }

    pub fn gpg(&self) -> Result<&GpgKeyringStore> {
        self.gpg
            .as_ref()
            .ok_or_else(|| KeybankError::NotInitialized(self.root.join(GPG)))
    }

    /// Commit every store; paths in the result are prefixed with the store name.
    pub fn commit(&self, message: &str, dry_run: bool) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for (name, store) in self.stores() {
            changes.extend_prefixed(&format!("/{name}"), store.commit(message, dry_run)?);
        }
        Ok(changes)
    }

    /// Stores a backup or restore acts on.
    fn transfer_targets(&self, include_gpg: bool) -> Vec<(&'static str, &dyn Store)> {
        self.stores()
            .into_iter()
            .filter(|(name, _)| *name != GPG || include_gpg)
            .collect()
    }

    pub fn backup(&self, request: &StoreRequest, include_gpg: bool) -> Result<()> {
        for (name, store) in self.transfer_targets(include_gpg) {
            info!("backup: {} store", name);
            store.backup(request)?;
        }
        Ok(())
    }

    pub fn restore(&self, request: &StoreRequest, include_gpg: bool) -> Result<()> {
        for (name, store) in self.transfer_targets(include_gpg) {
            info!("restore: {} store", name);
            store.restore(request)?;
        }
        Ok(())
    }

    /// Verify every store, returning each status by name.
    pub fn verify(&self) -> Result<Vec<(&'static str, VerificationStatus)>> {
        self.stores()
            .into_iter()
            .map(|(name, store)| Ok((name, store.verify()?)))
            .collect()
    }
}

/// Fold per-store statuses into one, prefixing paths with the store name.
pub fn overall(statuses: &[(&str, VerificationStatus)]) -> VerificationStatus {
    let mut all = VerificationStatus::new();
    for (name, status) in statuses {
        all.merge_prefixed(&format!("/{name}"), status.clone());
    }
    all
}

//! GPG keyring isolation.
//!
//! Every immediate subdirectory of the store is one keyring home holding a
//! full keyring, master key included. Those never leave the volume. What
//! leaves is a derived keyring built by exporting only the secret subkeys,
//! staged under `_export/<name>/` for the operator to copy by hand.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{error, info, warn};

use crate::changes::ChangeSet;
use crate::error::{KeybankError, Result};
use crate::gpg::{primary_key_id, primary_secret_is_stub, public_key_ids, Gpg, KeyringTool};
use crate::status::VerificationStatus;

use super::tree::create_private_dirs;
use super::{create_root, Store, StoreContext, StoreKind, StoreRequest};

/// Prefix of directory names that are not keyrings.
pub const RESERVED_PREFIX: char = '_';
pub const EXPORT_DIR: &str = "_export";
pub const EXPORT_FILE: &str = "secret-subkeys.gpg";

/// Which listing of a keyring failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringDamage {
    Public,
    Private,
}

impl KeyringDamage {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyringDamage::Public => "public",
            KeyringDamage::Private => "private",
        }
    }
}

pub struct GpgKeyringStore {
    root: PathBuf,
    keyring: Rc<dyn KeyringTool>,
}

impl GpgKeyringStore {
    pub fn initialize(root: &Path, ctx: StoreContext) -> Result<Self> {
        create_root(root)?;
        Self::open(root, ctx)
    }

    pub fn open(root: &Path, ctx: StoreContext) -> Result<Self> {
        if !root.is_dir() {
            return Err(KeybankError::NotInitialized(root.to_path_buf()));
        }
        Ok(Self::with_keyring(root, Rc::new(Gpg::new(ctx.runner))))
    }

    pub fn with_keyring(root: &Path, keyring: Rc<dyn KeyringTool>) -> Self {
        Self {
            root: root.to_path_buf(),
            keyring,
        }
    }

    fn home(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn export_dir(&self, name: &str) -> PathBuf {
        self.root.join(EXPORT_DIR).join(name)
    }

    /// Names of the keyring homes in this store, sorted.
    pub fn scan(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RESERVED_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// List public then secret keys of one keyring.
    pub fn verify_keyring(&self, name: &str) -> Result<Option<KeyringDamage>> {
        let home = self.home(name);
        if !self.keyring.list_public(&home)?.success {
            return Ok(Some(KeyringDamage::Public));
        }
        if !self.keyring.list_secret(&home)?.success {
            return Ok(Some(KeyringDamage::Private));
        }
        Ok(None)
    }

    /// Derive a keyring holding only secret subkeys from keyring `name`.
    ///
    /// Returns the home of the derived keyring.
    pub fn export_subkeys(&self, name: &str) -> Result<PathBuf> {
        let home = self.home(name);
        let listing = self.keyring.list_public(&home)?.check("gpg")?;
        let key_id = primary_key_id(&listing.stdout).ok_or_else(|| {
            KeybankError::Corruption(format!("no public key found in keyring {name}"))
        })?;

        let export = self.export_dir(name);
        if export.exists() {
            fs::remove_dir_all(&export)?;
        }
        let derived = export.join("gnupg");
        create_private_dirs(&derived)?;

        let file = export.join(EXPORT_FILE);
        info!("exporting secret subkeys of {} from keyring {}", key_id, name);
        self.keyring.export_secret_subkeys(&home, &key_id, &file)?;
        self.keyring.import(&derived, &file)?;

        let expected = public_key_ids(&listing.stdout);
        let public = self.keyring.list_public(&derived)?.check("gpg")?;
        let actual = public_key_ids(&public.stdout);
        if actual != expected {
            return Err(KeybankError::Corruption(format!(
                "derived keyring {} lists public keys [{}], expected [{}]",
                derived.display(),
                actual.join(", "),
                expected.join(", ")
            )));
        }

        let secret = self.keyring.list_secret(&derived)?.check("gpg")?;
        if !primary_secret_is_stub(&secret.stdout) {
            return Err(KeybankError::Corruption(format!(
                "derived keyring {} still holds the master key",
                derived.display()
            )));
        }

        info!("subkey-only keyring for {} written to {}", name, derived.display());
        Ok(derived)
    }
}

fn banner(lines: &[String]) {
    warn!("{}", "*".repeat(72));
    warn!("ATTENTION");
    for line in lines {
        warn!("{}", line);
    }
    warn!("{}", "*".repeat(72));
}

impl Store for GpgKeyringStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Gpg
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn commit(&self, _message: &str, _dry_run: bool) -> Result<ChangeSet> {
        Ok(ChangeSet::default())
    }

    fn backup(&self, _request: &StoreRequest) -> Result<()> {
        banner(&[
            "GPG keyrings are not backed up automatically.".to_string(),
            format!(
                "Create or import each keyring with --homedir {}/<name>",
                self.root.display()
            ),
        ]);
        Ok(())
    }

    fn restore(&self, request: &StoreRequest) -> Result<()> {
        let names = self.scan()?;
        if request.dry_run {
            for name in &names {
                info!("would export subkeys of keyring {}", name);
            }
            return Ok(());
        }

        let mut exported = Vec::new();
        for name in &names {
            exported.push(self.export_subkeys(name)?);
        }

        let mut lines = vec![
            "Keyrings holding the master key are never copied off the volume.".to_string(),
            "Copy each subkey-only keyring below to its destination by hand:".to_string(),
        ];
        lines.extend(exported.iter().map(|p| format!("  {}", p.display())));
        banner(&lines);
        Ok(())
    }

    fn verify(&self) -> Result<VerificationStatus> {
        let mut status = VerificationStatus::new();
        for name in self.scan()? {
            if let Some(damage) = self.verify_keyring(&name)? {
                error!("keyring {} failed its {} key listing", name, damage.as_str());
                status.record_auxiliary_error(name, damage.as_str());
            }
        }
        Ok(status)
    }
}

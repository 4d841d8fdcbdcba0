//! # keybank
//!
//! Encrypted, offline, integrity-verified backups of SSH keys, GPG keyrings and
//! other credential material.
//!
//! ## Features
//!
//! - **Encrypted volume**: backups live on a LUKS container managed with `cryptsetup`
//! - **Manifest-driven selection**: glob patterns with an expected file count, so a
//!   drifted source never produces a silent partial backup
//! - **Content-hash lock**: every backed-up file is recorded by SHA-256 digest
//! - **Audit trail**: every store is a git repository; `commit` records each change
//! - **Verification**: `git fsck` plus a full re-hash against the lock
//! - **GPG isolation**: derives subkey-only keyrings so the master key never leaves
//!   the volume
//!
//! ## Quick Start
//!
//! ```bash
//! # Create a 128 MiB volume and lay out the stores (as root)
//! keybank create /root/keybank.img
//!
//! # Declare what to back up
//! cat > /mnt/keybank-keybank.img/generic/manifest.json << 'EOF'
//! [{"path": "/etc/ssh/ssh_host_*_key", "amount": 3}]
//! EOF
//!
//! # Copy, record, verify
//! keybank backup keybank.img
//! keybank commit keybank.img
//! keybank verify keybank.img
//!
//! keybank detach keybank.img
//! ```
//!
//! ## How It Works
//!
//! A mounted volume (a *keybank*) holds four stores:
//!
//! - `archival/`: files placed by hand, locked and committed as they are
//! - `generic/`: files from one machine, selected by a flat manifest
//! - `synchronized/`: `_common` files plus per-machine scopes
//! - `gpg/`: full GPG keyrings, one home per directory
//!
//! Every store follows one protocol:
//!
//! ```text
//! backup:  manifest -> select (all or nothing) -> copy + hash -> manifest.lock.json
//! commit:  re-hash tree -> diff against lock -> rewrite lock -> git commit
//! verify:  git fsck + re-hash tree vs lock + git status -> VerificationStatus
//! restore: manifest.lock.json -> copy back, chown by name, owner-only modes
//! ```
//!
//! ## Module Overview
//!
//! - [`hash`] - Streaming SHA-256 content hashing
//! - [`select`] - Manifest pattern expansion with count enforcement
//! - [`manifest`] - Flat and scoped manifests
//! - [`lock`] - The lock file
//! - [`changes`] - Change sets and the git status protocol
//! - [`integrity`] - Repository consistency checking
//! - [`status`] - Verification aggregation
//! - [`store`] - Store variants and the shared protocol
//! - [`keybank`] - The store layout of a volume
//! - [`git`], [`gpg`], [`volume`], [`identity`], [`exec`] - Adapters over external tools
//! - [`config`] - Runtime settings
//! - [`error`] - Error types
//!
//! ## Commands
//!
//! - `create PATH [-s SIZE]` - Create, format and mount a volume, then lay out the stores
//! - `init DIR` - Lay out the stores in an existing directory
//! - `attach PATH` / `detach NAME` - Open and close a volume
//! - `backup` / `restore [NAME|--root DIR] [DIR]` - Copy files in or out
//! - `commit [NAME|--root DIR] [-m MSG]` - Record the current state
//! - `status [NAME|--root DIR]` - Show uncommitted drift
//! - `verify [NAME|--root DIR]` - Check repository and file integrity
//! - `gpg-export [NAME|--root DIR] KEYRING` - Derive a subkey-only keyring
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib
//! cargo test --test integration_test
//! ```
//!
//! Tests need the `git` binary; nothing touches real volumes or keyrings.

pub mod changes;
pub mod config;
pub mod error;
pub mod exec;
pub mod git;
pub mod gpg;
pub mod hash;
pub mod identity;
pub mod integrity;
pub mod keybank;
pub mod lock;
pub mod manifest;
pub mod select;
pub mod status;
pub mod store;
pub mod volume;

// Re-export commonly used types
pub use changes::{ChangeDetector, ChangeSet};
pub use config::KeybankConfig;
pub use error::{KeybankError, Result};
pub use keybank::Keybank;
pub use lock::LockedManifest;
pub use manifest::Manifest;
pub use status::{Verdict, VerificationStatus};
pub use store::{Store, StoreContext, StoreKind, StoreRequest};

//! # Locked Manifests
//!
//! The lock file is the "last known good" record of a store: a mapping of
//! store-relative path to content digest, optionally with the owner and group
//! the file had on its source machine.
//!
//! ## Format
//!
//! ```text
//! {
//!     "/etc/ssh/ssh_host_ed25519_key": {
//!         "hash": "…",
//!         "owner": "root",
//!         "group": "root"
//!     },
//!     "/notes.txt": "…"
//! }
//! ```
//!
//! Paths are sorted and indentation is fixed so that the file diffs cleanly
//! under version control. Entries without ownership are written as a bare
//! digest string.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use tempfile::NamedTempFile;

use crate::error::{KeybankError, Result};
use crate::hash::Snapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Digest(String),
    Full {
        hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
}

/// One file's last known good state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntry", into = "RawEntry")]
pub struct LockedEntry {
    pub hash: String,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl LockedEntry {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            owner: None,
            group: None,
        }
    }

    pub fn with_ownership(hash: impl Into<String>, owner: String, group: String) -> Self {
        Self {
            hash: hash.into(),
            owner: Some(owner),
            group: Some(group),
        }
    }
}

impl From<RawEntry> for LockedEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Digest(hash) => LockedEntry::new(hash),
            RawEntry::Full { hash, owner, group } => LockedEntry { hash, owner, group },
        }
    }
}

impl From<LockedEntry> for RawEntry {
    fn from(entry: LockedEntry) -> Self {
        match (entry.owner, entry.group) {
            (None, None) => RawEntry::Digest(entry.hash),
            (owner, group) => RawEntry::Full {
                hash: entry.hash,
                owner,
                group,
            },
        }
    }
}

/// Mapping of store-relative path to [`LockedEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedManifest {
    entries: BTreeMap<String, LockedEntry>,
}

impl LockedManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lock from a fresh hash snapshot, without ownership.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            entries: snapshot
                .iter()
                .map(|(path, hash)| (path.clone(), LockedEntry::new(hash.clone())))
                .collect(),
        }
    }

    /// Read a lock file. A missing file is an empty lock.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let entries: BTreeMap<String, LockedEntry> = serde_json::from_str(text)?;
        if let Some(bad) = entries.keys().find(|k| !k.starts_with('/')) {
            return Err(KeybankError::Corruption(format!(
                "lock entry '{bad}' is not store-relative"
            )));
        }
        Ok(Self { entries })
    }

    /// Stable serialization: sorted keys, four-space indentation.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = Serializer::with_formatter(&mut buf, formatter);
        self.entries.serialize(&mut serializer)?;
        String::from_utf8(buf).map_err(|e| KeybankError::Other(e.to_string()))
    }

    /// Write the lock atomically: a temporary file in the same directory is
    /// renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| KeybankError::Other(format!("no parent for {}", path.display())))?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(self.to_json()?.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| KeybankError::Io(e.error))?;
        Ok(())
    }

    /// Keep owner/group recorded in `previous` for paths that are still present.
    pub fn carry_ownership(mut self, previous: &LockedManifest) -> Self {
        for (path, entry) in self.entries.iter_mut() {
            if let Some(old) = previous.get(path) {
                entry.owner = old.owner.clone();
                entry.group = old.group.clone();
            }
        }
        self
    }

    /// Path to digest, dropping ownership.
    pub fn digests(&self) -> Snapshot {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.hash.clone()))
            .collect()
    }

    pub fn insert(&mut self, path: String, entry: LockedEntry) {
        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &str) -> Option<&LockedEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LockedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

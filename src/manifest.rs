//! # Manifests
//!
//! A manifest declares which source files a store backs up. Two on-disk shapes
//! exist:
//!
//! ```text
//! [{"path": "/etc/ssh/ssh_host_*_key", "amount": 2}]
//!
//! {"_common": {"files": [...], "from_directory": "/", "user": "root", "group": "root"},
//!  "laptop":  {"files": [...], "from_directory": "/home/me", "user": "me", "group": "me"}}
//! ```
//!
//! Both are normalized at load time into a [`Manifest`] made of named
//! [`Scope`]s; a flat list becomes the single `_common` scope.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KeybankError, Result};

/// Name of the scope every backup and restore acts on.
pub const COMMON_SCOPE: &str = "_common";

/// One source-selection pattern with the number of files it must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(alias = "entry")]
    pub path: String,
    pub amount: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScopeFile {
    #[serde(default)]
    files: Vec<ManifestEntry>,
    from_directory: Option<PathBuf>,
    user: Option<String>,
    group: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Flat(Vec<ManifestEntry>),
    Scoped(BTreeMap<String, ScopeFile>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestShape {
    Flat,
    Scoped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub entries: Vec<ManifestEntry>,
    pub from_directory: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl Scope {
    pub fn new(name: impl Into<String>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
            from_directory: None,
            user: None,
            group: None,
        }
    }

    /// Directory this scope's patterns are rooted at.
    ///
    /// The declared `from_directory` always wins over the caller's directory.
    pub fn directory<'a>(&'a self, fallback: &'a Path) -> &'a Path {
        self.from_directory.as_deref().unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    shape: ManifestShape,
    scopes: BTreeMap<String, Scope>,
}

impl Manifest {
    /// A flat manifest: one `_common` scope.
    pub fn flat(entries: Vec<ManifestEntry>) -> Self {
        let mut scopes = BTreeMap::new();
        scopes.insert(COMMON_SCOPE.to_string(), Scope::new(COMMON_SCOPE, entries));
        Self {
            shape: ManifestShape::Flat,
            scopes,
        }
    }

    /// Load and normalize a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(KeybankError::Configuration(format!(
                "manifest not found: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| match e {
            KeybankError::Configuration(msg) => {
                KeybankError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let file: ManifestFile = serde_json::from_str(text).map_err(|e| {
            KeybankError::Configuration(format!(
                "malformed manifest, expected a list of entries or a map of scopes ({e})"
            ))
        })?;

        match file {
            ManifestFile::Flat(entries) => Ok(Self::flat(entries)),
            ManifestFile::Scoped(map) => {
                if !map.contains_key(COMMON_SCOPE) {
                    return Err(KeybankError::Configuration(format!(
                        "scoped manifest has no '{COMMON_SCOPE}' scope"
                    )));
                }

                let mut scopes = BTreeMap::new();
                for (name, scope) in map {
                    validate_scope_name(&name)?;
                    scopes.insert(
                        name.clone(),
                        Scope {
                            name,
                            entries: scope.files,
                            from_directory: scope.from_directory,
                            user: scope.user,
                            group: scope.group,
                        },
                    );
                }
                Ok(Self {
                    shape: ManifestShape::Scoped,
                    scopes,
                })
            }
        }
    }

    pub fn shape(&self) -> ManifestShape {
        self.shape
    }

    /// Look up a scope; an unknown name is a configuration error.
    pub fn scope(&self, name: &str) -> Result<&Scope> {
        self.scopes.get(name).ok_or_else(|| {
            KeybankError::Configuration(format!("'{name}' is not a valid machine"))
        })
    }

    pub fn common(&self) -> &Scope {
        &self.scopes[COMMON_SCOPE]
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    /// `_common` plus `machine`, in that order.
    pub fn scopes_for(&self, machine: Option<&str>) -> Result<Vec<&Scope>> {
        let mut selected = vec![self.common()];
        if let Some(machine) = machine.filter(|m| *m != COMMON_SCOPE) {
            selected.push(self.scope(machine)?);
        }
        Ok(selected)
    }
}

fn validate_scope_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(KeybankError::Configuration(format!(
            "invalid scope name '{name}'"
        )))
    }
}

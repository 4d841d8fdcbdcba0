//! Runtime settings.
//!
//! Read from a TOML file, then overridden by `KEYBANK_*` environment
//! variables, then by command-line flags in the binary:
//!
//! ```toml
//! machine = "laptop"
//! mount_prefix = "/mnt/keybank-"
//! mapper_dir = "/dev/mapper"
//! default_directory = "/"
//! include_gpg = false
//! ```

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::{KeybankError, Result};

pub const SYSTEM_CONFIG: &str = "/etc/keybank.toml";
const ENV_PREFIX: &str = "KEYBANK_";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeybankConfig {
    /// Machine scope to back up and restore besides `_common`.
    pub machine: Option<String>,
    /// Mount points are `<mount_prefix><volume name>`.
    pub mount_prefix: String,
    pub mapper_dir: PathBuf,
    /// Source for backup and target for restore when none is given.
    pub default_directory: PathBuf,
    pub include_gpg: bool,
}

impl Default for KeybankConfig {
    fn default() -> Self {
        Self {
            machine: None,
            mount_prefix: "/mnt/keybank-".into(),
            mapper_dir: PathBuf::from("/dev/mapper"),
            default_directory: PathBuf::from("/"),
            include_gpg: false,
        }
    }
}

impl KeybankConfig {
    /// Load `path`, or the system file if present, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) if !p.is_file() => {
                return Err(KeybankError::Configuration(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(SYSTEM_CONFIG)).filter(|p| p.is_file()),
        };

        let mut cfg = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let source = path
            .to_str()
            .ok_or_else(|| KeybankError::Configuration("Invalid config path".into()))?;
        Config::builder()
            .add_source(File::new(source, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|err| {
                KeybankError::Configuration(format!("Failed to load {}: {err}", path.display()))
            })
    }

    fn apply_env(&mut self) {
        let var = |name: &str| env::var(format!("{ENV_PREFIX}{name}")).ok();

        if let Some(machine) = var("MACHINE") {
            self.machine = Some(machine).filter(|m| !m.is_empty());
        }
        if let Some(prefix) = var("MOUNT_PREFIX") {
            self.mount_prefix = prefix;
        }
        if let Some(dir) = var("MAPPER_DIR") {
            self.mapper_dir = dir.into();
        }
        if let Some(dir) = var("DEFAULT_DIRECTORY") {
            self.default_directory = dir.into();
        }
        if let Some(include) = var("INCLUDE_GPG").and_then(|v| v.parse().ok()) {
            self.include_gpg = include;
        }
    }
}

//! # Encrypted Volumes
//!
//! A keybank lives on a LUKS container in a regular image file. The lifecycle
//! is delegated to `cryptsetup`, `mkfs.ext4`, `mount` and `umount`:
//!
//! ```text
//! create:  image (sparse) -> luksFormat -> luksOpen -> mkfs.ext4 -> mount
//! attach:  luksOpen -> mount
//! detach:  umount -> rmdir mount point -> luksClose
//! ```
//!
//! Passphrase prompts go straight to the operator's terminal.

use std::fs::{self, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::info;

use crate::config::KeybankConfig;
use crate::error::{KeybankError, Result};
use crate::exec::{arg, CommandRunner};

/// Size of a new image when none is given.
pub const DEFAULT_SIZE: u64 = 128 * 1024 * 1024;

/// Where one volume's image, mapper device and mount point live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub image: Option<PathBuf>,
    pub mapper: PathBuf,
    pub mount: PathBuf,
}

impl Volume {
    /// The volume named after `image`'s file name.
    pub fn for_image(image: &Path, config: &KeybankConfig) -> Result<Self> {
        let name = image
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                KeybankError::Configuration(format!("invalid image path: {}", image.display()))
            })?;
        let mut volume = Self::named(name, config);
        volume.image = Some(image.to_path_buf());
        Ok(volume)
    }

    pub fn named(name: &str, config: &KeybankConfig) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            mapper: config.mapper_dir.join(name),
            mount: PathBuf::from(format!("{}{}", config.mount_prefix, name)),
        }
    }

    fn image(&self) -> Result<&Path> {
        self.image
            .as_deref()
            .ok_or_else(|| KeybankError::Other(format!("no image known for volume {}", self.name)))
    }
}

pub trait VolumeTool {
    /// Create, format and mount a new volume at `image`.
    fn create(&self, volume: &Volume, size: u64) -> Result<()>;

    fn attach(&self, volume: &Volume) -> Result<()>;

    fn detach(&self, volume: &Volume) -> Result<()>;

    fn attached(&self, volume: &Volume) -> bool;
}

pub struct Cryptsetup {
    runner: Rc<dyn CommandRunner>,
}

impl Cryptsetup {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn mount(&self, volume: &Volume) -> Result<()> {
        fs::create_dir_all(&volume.mount)?;
        self.runner.run_checked(
            "mount",
            &[arg(&volume.mapper), arg(&volume.mount)],
            None,
        )?;
        Ok(())
    }

    fn open(&self, volume: &Volume) -> Result<()> {
        self.runner.interactive(
            "cryptsetup",
            &["luksOpen".into(), arg(volume.image()?), volume.name.clone()],
        )
    }
}

impl VolumeTool for Cryptsetup {
    fn create(&self, volume: &Volume, size: u64) -> Result<()> {
        let image = volume.image()?;
        if image.exists() {
            return Err(KeybankError::AlreadyInitialized(image.to_path_buf()));
        }
        if self.attached(volume) {
            return Err(KeybankError::AlreadyAttached(volume.name.clone()));
        }

        info!("creating {} byte image at {}", size, image.display());
        File::create(image)?.set_len(size)?;

        self.runner.interactive(
            "cryptsetup",
            &["--batch-mode".into(), "luksFormat".into(), arg(image)],
        )?;
        self.open(volume)?;
        self.runner
            .run_checked("mkfs.ext4", &["-q".into(), arg(&volume.mapper)], None)?;
        self.mount(volume)?;
        fs::set_permissions(&volume.mount, Permissions::from_mode(0o700))?;

        info!("volume {} mounted at {}", volume.name, volume.mount.display());
        Ok(())
    }

    fn attach(&self, volume: &Volume) -> Result<()> {
        if self.attached(volume) {
            return Err(KeybankError::AlreadyAttached(volume.name.clone()));
        }
        self.open(volume)?;
        self.mount(volume)?;
        info!("volume {} mounted at {}", volume.name, volume.mount.display());
        Ok(())
    }

    fn detach(&self, volume: &Volume) -> Result<()> {
        if !self.attached(volume) {
            return Err(KeybankError::NotAttached(volume.name.clone()));
        }
        if volume.mount.exists() {
            self.runner
                .run_checked("umount", &[arg(&volume.mount)], None)?;
            fs::remove_dir(&volume.mount)?;
        }
        if volume.mapper.exists() {
            self.runner.run_checked(
                "cryptsetup",
                &["luksClose".into(), volume.name.clone()],
                None,
            )?;
        }
        info!("volume {} detached", volume.name);
        Ok(())
    }

    fn attached(&self, volume: &Volume) -> bool {
        volume.mapper.exists() || volume.mount.exists()
    }
}

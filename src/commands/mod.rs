pub mod backup;
pub mod commit;
pub mod gpg_export;
pub mod init;
pub mod status;
pub mod verify;
pub mod volume;

pub use backup::{backup, restore};
pub use commit::commit;
pub use gpg_export::gpg_export;
pub use init::init;
pub use status::status;
pub use verify::verify;
pub use volume::{attach, create, detach};

use std::path::PathBuf;

use keybank::error::{KeybankError, Result};
use keybank::volume::{Cryptsetup, Volume, VolumeTool};
use keybank::{Keybank, KeybankConfig, StoreContext};

/// Which keybank a store command acts on.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub name: Option<String>,
    pub root: Option<PathBuf>,
}

/// Options shared by backup and restore.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub directory: PathBuf,
    pub machine: Option<String>,
    pub include_gpg: bool,
    pub dry_run: bool,
}

/// Open the keybank named by `target`, which must be attached.
pub fn open_keybank(target: &Target, config: &KeybankConfig) -> Result<Keybank> {
    let ctx = StoreContext::system();
    match (&target.root, &target.name) {
        (Some(root), _) => Keybank::open(root, ctx),
        (None, Some(name)) => {
            let volume = Volume::named(name, config);
            if !Cryptsetup::new(ctx.runner.clone()).attached(&volume) {
                return Err(KeybankError::NotAttached(name.clone()));
            }
            Keybank::open(&volume.mount, ctx)
        }
        (None, None) => Err(KeybankError::Configuration(
            "specify a keybank NAME or --root DIR".into(),
        )),
    }
}

pub fn require_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(KeybankError::Other(
            "this command must be run as root".into(),
        ))
    }
}

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use keybank::error::{KeybankError, Result};
use keybank::volume::{Cryptsetup, Volume, VolumeTool};
use keybank::{Keybank, KeybankConfig, StoreContext};

use super::require_root;

const MIB: u64 = 1024 * 1024;

/// Create an encrypted volume and lay out the stores in it
pub fn create(path: &Path, size_mib: u64, config: &KeybankConfig) -> Result<()> {
    require_root()?;
    check_parent(path)?;

    let ctx = StoreContext::system();
    let volume = Volume::for_image(path, config)?;
    println!("Creating keybank '{}' at {}", volume.name, path.display());

    Cryptsetup::new(ctx.runner.clone()).create(&volume, size_mib * MIB)?;
    Keybank::create(&volume.mount, ctx)?;

    println!("\nKeybank created and mounted at {}", volume.mount.display());
    println!("\nNext steps:");
    println!("1. List files to back up in generic/manifest.json or synchronized/manifest.json");
    println!("2. Run 'keybank backup {}' and 'keybank commit {}'", volume.name, volume.name);
    println!("3. Run 'keybank detach {}' when done", volume.name);
    Ok(())
}

/// The image's directory must belong to root, so no other user can swap it.
fn check_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let meta = std::fs::metadata(parent)?;
    if meta.uid() != 0 {
        return Err(KeybankError::Other(format!(
            "{} must be owned by root",
            parent.display()
        )));
    }
    Ok(())
}

/// Open and mount an existing volume
pub fn attach(path: &Path, config: &KeybankConfig) -> Result<()> {
    require_root()?;
    if !path.is_file() {
        return Err(KeybankError::Other(format!(
            "no image at {}",
            path.display()
        )));
    }

    let volume = Volume::for_image(path, config)?;
    Cryptsetup::new(StoreContext::system().runner).attach(&volume)?;
    println!("Keybank '{}' attached at {}", volume.name, volume.mount.display());
    Ok(())
}

/// Unmount and close a volume
pub fn detach(name: &str, config: &KeybankConfig) -> Result<()> {
    require_root()?;
    let volume = Volume::named(name, config);
    Cryptsetup::new(StoreContext::system().runner).detach(&volume)?;
    println!("Keybank '{}' detached", name);
    Ok(())
}

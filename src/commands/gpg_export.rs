use keybank::error::{KeybankError, Result};
use keybank::{KeybankConfig, Store};

use super::{open_keybank, Target};

/// Derive a subkey-only keyring from one keyring of the gpg store
pub fn gpg_export(target: &Target, keyring: &str, config: &KeybankConfig) -> Result<()> {
    let keybank = open_keybank(target, config)?;
    let store = keybank.gpg()?;

    if !store.scan()?.iter().any(|name| name == keyring) {
        return Err(KeybankError::Configuration(format!(
            "no keyring named '{keyring}' in {}",
            store.root().display()
        )));
    }

    let home = store.export_subkeys(keyring)?;
    println!("Subkey-only keyring written to {}", home.display());
    println!("\nThe master key stays on the volume. Copy this keyring to its destination by hand,");
    println!("e.g. 'cp -r {} ~/.gnupg' on the target machine.", home.display());
    Ok(())
}

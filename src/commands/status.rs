use keybank::error::Result;
use keybank::KeybankConfig;

use super::{open_keybank, Target};

/// Show changes not yet committed, per store
pub fn status(target: &Target, config: &KeybankConfig) -> Result<()> {
    let keybank = open_keybank(target, config)?;

    for (name, store) in keybank.stores() {
        let changes = store.commit("", true)?;
        println!("{name} ({}):", store.kind());
        for line in changes.to_string().lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

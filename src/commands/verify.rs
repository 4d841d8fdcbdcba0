use keybank::error::{KeybankError, Result};
use keybank::keybank::overall;
use keybank::KeybankConfig;

use super::{open_keybank, Target};

/// Check repositories, files and keyrings of every store
pub fn verify(target: &Target, config: &KeybankConfig) -> Result<()> {
    let keybank = open_keybank(target, config)?;
    let statuses = keybank.verify()?;

    for (name, status) in &statuses {
        status.log();
        println!("{name}: {}", status.verdict());
    }

    let all = overall(&statuses);
    if all.is_good() {
        println!("\nAll stores verified");
        Ok(())
    } else {
        Err(KeybankError::Corruption(format!(
            "verification failed ({})",
            all.verdict()
        )))
    }
}

use keybank::error::Result;
use keybank::store::DEFAULT_COMMIT_MESSAGE;
use keybank::KeybankConfig;

use super::{open_keybank, Target};

/// Record the current state of every store
pub fn commit(
    target: &Target,
    message: Option<&str>,
    dry_run: bool,
    config: &KeybankConfig,
) -> Result<()> {
    let keybank = open_keybank(target, config)?;
    let changes = keybank.commit(message.unwrap_or(DEFAULT_COMMIT_MESSAGE), dry_run)?;

    print!("{changes}");
    if dry_run {
        println!("\nDry run, nothing was recorded");
    } else if !changes.is_empty() {
        println!("\nCommitted {} change(s)", changes.len());
    }
    Ok(())
}

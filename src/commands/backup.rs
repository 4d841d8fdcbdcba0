use keybank::error::Result;
use keybank::{KeybankConfig, StoreRequest};

use super::{open_keybank, Target, Transfer};

fn request(transfer: &Transfer) -> StoreRequest {
    StoreRequest {
        directory: transfer.directory.clone(),
        machine: transfer.machine.clone(),
        dry_run: transfer.dry_run,
    }
}

/// Copy manifest-selected files into the keybank
pub fn backup(target: &Target, transfer: &Transfer, config: &KeybankConfig) -> Result<()> {
    let keybank = open_keybank(target, config)?;
    keybank.backup(&request(transfer), transfer.include_gpg)?;

    if transfer.dry_run {
        println!("Dry run complete, nothing was copied");
    } else {
        println!("Backup complete");
        println!("Review the changes with 'keybank status' and record them with 'keybank commit'");
    }
    Ok(())
}

/// Copy backed-up files out of the keybank
pub fn restore(target: &Target, transfer: &Transfer, config: &KeybankConfig) -> Result<()> {
    let keybank = open_keybank(target, config)?;
    keybank.restore(&request(transfer), transfer.include_gpg)?;

    if transfer.dry_run {
        println!("Dry run complete, nothing was restored");
    } else {
        println!("Restore complete");
    }
    Ok(())
}

use std::path::Path;

use keybank::error::{KeybankError, Result};
use keybank::{Keybank, StoreContext};

/// Lay out the stores in an existing directory
pub fn init(directory: &Path) -> Result<()> {
    println!("Initializing keybank in {}...", directory.display());

    if !directory.is_dir() {
        return Err(KeybankError::Other(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let keybank = Keybank::create(directory, StoreContext::system())?;
    for (name, store) in keybank.stores() {
        println!("Created {} store at {}", store.kind(), directory.join(name).display());
    }

    println!("\nInitialization complete!");
    Ok(())
}

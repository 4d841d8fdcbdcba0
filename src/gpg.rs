//! # GnuPG Keyrings
//!
//! Thin adapter over the `gpg` binary. Every invocation is pinned to an
//! explicit `--homedir` and runs in batch mode, so the operator's own keyring
//! is never touched.
//!
//! Listings use the machine-readable colon format (see `doc/DETAILS` in the
//! GnuPG sources). The fields keybank relies on:
//!
//! ```text
//! pub:u:4096:1:0123456789ABCDEF:1700000000:::u:::scESC:::
//! sec:u:4096:1:0123456789ABCDEF:1700000000:::u:::scESC:::#:::
//!     ^ record type     ^ field 5: key id              ^ field 15: token serial,
//!                                                         `#` = stub (no secret)
//! ```

use std::path::Path;
use std::rc::Rc;

use crate::error::Result;
use crate::exec::{arg, CommandOutput, CommandRunner};

/// Index of the key id in a colon record.
const KEY_ID_FIELD: usize = 4;
/// Index of the token serial number in a colon record.
const TOKEN_FIELD: usize = 14;

pub trait KeyringTool {
    /// List public keys of the keyring at `home`. The raw result is returned
    /// so callers can classify failures themselves.
    fn list_public(&self, home: &Path) -> Result<CommandOutput>;

    fn list_secret(&self, home: &Path) -> Result<CommandOutput>;

    /// Export the secret subkeys of `key_id` with their passphrases reset and
    /// without the primary key's secret material.
    fn export_secret_subkeys(&self, home: &Path, key_id: &str, output: &Path) -> Result<()>;

    fn import(&self, home: &Path, file: &Path) -> Result<()>;
}

pub struct Gpg {
    runner: Rc<dyn CommandRunner>,
}

impl Gpg {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn args(home: &Path, rest: &[&str]) -> Vec<String> {
        let mut args = vec!["--homedir".to_string(), arg(home), "--batch".to_string()];
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }
}

impl KeyringTool for Gpg {
    fn list_public(&self, home: &Path) -> Result<CommandOutput> {
        self.runner
            .run("gpg", &Self::args(home, &["--with-colons", "--list-keys"]), None)
    }

    fn list_secret(&self, home: &Path) -> Result<CommandOutput> {
        self.runner.run(
            "gpg",
            &Self::args(home, &["--with-colons", "--list-secret-keys"]),
            None,
        )
    }

    fn export_secret_subkeys(&self, home: &Path, key_id: &str, output: &Path) -> Result<()> {
        let output = arg(output);
        let args = Self::args(
            home,
            &[
                "--export-options",
                "export-reset-subkey-passwd",
                "--output",
                &output,
                "--export-secret-subkeys",
                key_id,
            ],
        );
        self.runner.run_checked("gpg", &args, None)?;
        Ok(())
    }

    fn import(&self, home: &Path, file: &Path) -> Result<()> {
        let file = arg(file);
        self.runner
            .run_checked("gpg", &Self::args(home, &["--import", &file]), None)?;
        Ok(())
    }
}

fn records<'a>(listing: &'a str, kind: &'a str) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    listing
        .lines()
        .map(|line| line.split(':').collect::<Vec<_>>())
        .filter(move |fields| fields.first() == Some(&kind))
}

/// Key id of the first `pub` record.
pub fn primary_key_id(listing: &str) -> Option<String> {
    records(listing, "pub")
        .next()
        .and_then(|fields| fields.get(KEY_ID_FIELD).map(|id| id.to_string()))
        .filter(|id| !id.is_empty())
}

/// Whether the primary secret key in a `--list-secret-keys` listing is a stub.
///
/// A listing without any `sec` record has no primary secret either.
pub fn primary_secret_is_stub(listing: &str) -> bool {
    match records(listing, "sec").next() {
        Some(fields) => fields
            .get(TOKEN_FIELD)
            .is_some_and(|token| token.contains('#')),
        None => true,
    }
}

/// Key ids of every `pub` and `sub` record, in listing order.
pub fn public_key_ids(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(|line| line.split(':').collect::<Vec<_>>())
        .filter(|fields| matches!(fields.first(), Some(&"pub") | Some(&"sub")))
        .filter_map(|fields| fields.get(KEY_ID_FIELD).map(|id| id.to_string()))
        .collect()
}

//! Content hashing with SHA-256.
//!
//! Files are always read as raw bytes in fixed-size chunks; key material is
//! never decoded as text.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::Result;
use crate::select::relativize;

/// Read buffer size used while hashing.
pub const CHUNK_SIZE: usize = 1 << 20;

/// Mapping of store-relative path (leading `/`) to hex digest.
pub type Snapshot = BTreeMap<String, String>;

/// Hash raw bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash everything a reader yields.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file's content.
pub fn hash_file(path: &Path) -> Result<String> {
    hash_reader(File::open(path)?)
}

/// Every regular file below `root`, as (store-relative path, absolute path).
///
/// `excludes` holds store-relative paths (e.g. `/.git`, `/manifest.lock.json`);
/// an excluded directory is not descended into.
pub fn tracked_files(root: &Path, excludes: &HashSet<String>) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !excludes.contains(&relativize(entry.path(), root)));

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push((relativize(entry.path(), root), entry.into_path()));
        }
    }

    Ok(files)
}

/// Hash every regular file below `root`, skipping `excludes`.
pub fn snapshot(root: &Path, excludes: &HashSet<String>) -> Result<Snapshot> {
    tracked_files(root, excludes)?
        .into_iter()
        .map(|(rel, path)| Ok((rel, hash_file(&path)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            hash_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("key");
        let data: Vec<u8> = (0..=255u8).cycle().take(3 * CHUNK_SIZE + 17).collect();
        fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_hash_file_non_utf8() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("binary");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&[0xff, 0xfe, 0x00, 0x80]));
    }

    #[test]
    fn test_snapshot_skips_excludes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join("manifest.lock.json"), "{}").unwrap();
        fs::create_dir_all(root.join("ssh")).unwrap();
        fs::write(root.join("ssh/id_ed25519"), "a").unwrap();
        fs::write(root.join("top"), "b").unwrap();

        let excludes: HashSet<String> = ["/.git", "/manifest.lock.json"]
            .into_iter()
            .map(String::from)
            .collect();
        let hashes = snapshot(root, &excludes).unwrap();

        let keys: Vec<_> = hashes.keys().cloned().collect();
        assert_eq!(keys, vec!["/ssh/id_ed25519", "/top"]);
        assert_eq!(hashes["/ssh/id_ed25519"], hash_bytes(b"a"));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_hash_deterministic(data: Vec<u8>) {
            prop_assert_eq!(hash_bytes(&data), hash_bytes(&data));
            prop_assert_eq!(hash_reader(&data[..]).unwrap(), hash_bytes(&data));
        }
    }
}

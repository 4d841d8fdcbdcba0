//! Manifest pattern expansion and store-relative paths.

use std::path::{Component, Path, PathBuf};

use glob::{glob_with, MatchOptions};
use tracing::error;

use crate::error::{KeybankError, Result};
use crate::manifest::ManifestEntry;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Replace a leading `~` component with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Expand a glob pattern rooted at `base` into the regular files it matches.
///
/// The pattern's leading `/` is relative to `base`. Results are sorted.
pub fn expand(pattern: &str, base: &Path) -> Result<Vec<PathBuf>> {
    let candidate = if pattern.starts_with('~') {
        expand_home(Path::new(pattern))
    } else {
        expand_home(base).join(pattern.trim_start_matches('/'))
    };
    let text = candidate.to_str().ok_or_else(|| {
        KeybankError::Configuration(format!("pattern is not valid UTF-8: {}", candidate.display()))
    })?;

    let mut paths = Vec::new();
    for entry in glob_with(text, MATCH_OPTIONS)? {
        let path = entry.map_err(|e| KeybankError::Io(e.into_error()))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Expand one manifest entry, enforcing its declared file count.
pub fn select(entry: &ManifestEntry, base: &Path) -> Result<Vec<PathBuf>> {
    let paths = expand(&entry.path, base)?;
    if paths.len() != entry.amount {
        return Err(KeybankError::CountMismatch {
            pattern: entry.path.clone(),
            expected: entry.amount,
            actual: paths.len(),
        });
    }
    Ok(paths)
}

/// Expand every entry before anything is copied.
///
/// Every mismatch is logged so the operator sees the full picture, then the
/// first one is returned.
pub fn select_all(entries: &[ManifestEntry], base: &Path) -> Result<Vec<PathBuf>> {
    let mut selected = Vec::new();
    let mut first_error = None;

    for entry in entries {
        match select(entry, base) {
            Ok(paths) => selected.extend(paths),
            Err(err) => {
                error!("{}", err);
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(selected),
    }
}

/// Path of `path` below `base`, re-rooted with a leading `/`.
pub fn relativize(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}

/// Inverse of [`relativize`].
pub fn resolve(base: &Path, relative: &str) -> PathBuf {
    base.join(relative.trim_start_matches('/'))
}

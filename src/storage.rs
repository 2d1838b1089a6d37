//! Directory listing helpers shared by reference ingestion and the probe scan.
//! Listings are non-recursive, skip hidden entries and are sorted by name so a
//! run is reproducible on any filesystem.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn list(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        // follow symlinks so linked photo folders behave like real ones
        let is_dir = path.is_dir();
        if is_dir == want_dirs && (is_dir || path.is_file()) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Regular files directly inside `dir`.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list(dir, false)
}

/// Subfolders directly inside `dir`.
pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    list(dir, true)
}

/// File name as displayed in logs and used for destinations.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

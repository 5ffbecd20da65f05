//! Path utilities and root checks.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Source root must exist and be a directory. Returns the canonical path.
pub fn check_source_root(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        bail!("\"{}\" does not exist", path.display());
    }
    if !path.is_dir() {
        bail!("\"{}\" is not a directory", path.display());
    }
    path.canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))
}

/// Create the destination root (and missing parents) and return its canonical path.
/// An existing destination is reused; placeholders are overwritten.
pub fn prepare_dest_root(path: &Path) -> Result<PathBuf> {
    if path.exists() && !path.is_dir() {
        bail!("\"{}\" exists and is not a directory", path.display());
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("create destination root {}", path.display()))?;
    path.canonicalize()
        .with_context(|| format!("canonicalize {}", path.display()))
}

/// Reject a destination inside the source: the walk would mirror its own output.
pub fn check_roots_disjoint(source: &Path, dest: &Path) -> Result<()> {
    if dest.starts_with(source) {
        bail!(
            "destination \"{}\" is inside source \"{}\"",
            dest.display(),
            source.display()
        );
    }
    Ok(())
}

//! Source tree walk: turns the tree under a root into directory and file tasks.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::Task;
use crate::pipeline::CancelToken;
use crate::engine::tools::path_relative_to;

/// One result from the walk: a path with its kind, or an error with optional path.
pub enum WalkOutcome {
    Dir(PathBuf),
    File(PathBuf),
    Other(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => {
            let ft = entry.file_type();
            if ft.is_dir() {
                WalkOutcome::Dir(entry.into_path())
            } else if ft.is_file() {
                WalkOutcome::File(entry.into_path())
            } else {
                WalkOutcome::Other(entry.into_path())
            }
        }
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

/// Everything the coordinator needs from the source tree, in walk order (sorted by file name).
#[derive(Debug, Default)]
pub struct SourceTree {
    /// Parents always precede children.
    pub directories: Vec<Task>,
    pub files: Vec<Task>,
    pub skipped: Vec<(PathBuf, String)>,
    /// The walk stopped early on cancellation; the lists are partial.
    pub interrupted: bool,
}

/// Walk `root` (not following symlinks). Regular files become file tasks, directories become
/// directory tasks; anything else (symlinks, sockets, ...) is skipped. Unreadable subtrees are
/// recorded in `skipped`; an unreadable root is an error.
pub fn scan_source(root: &Path) -> Result<SourceTree> {
    scan_source_until(root, &CancelToken::new())
}

/// [`scan_source`] that checks `cancel` before every entry and stops with `interrupted` set.
pub fn scan_source_until(root: &Path, cancel: &CancelToken) -> Result<SourceTree> {
    std::fs::read_dir(root).with_context(|| format!("read source root {}", root.display()))?;

    let iter = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(to_outcome_walkdir);

    let mut tree = SourceTree::default();
    for outcome in iter {
        if cancel.is_cancelled() {
            tree.interrupted = true;
            break;
        }
        match outcome {
            WalkOutcome::Dir(path) => {
                if let Some(rel) = path_relative_to(&path, root) {
                    tree.directories.push(Task::directory(rel));
                }
            }
            WalkOutcome::File(path) => {
                if let Some(rel) = path_relative_to(&path, root) {
                    tree.files.push(Task::file(rel));
                }
            }
            WalkOutcome::Other(path) => {
                log::debug!("Skipping non-regular file {}", path.display());
            }
            WalkOutcome::Err { msg, path } => {
                log::warn!("Permission denied or error accessing path: {}", msg);
                let path = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                tree.skipped.push((path, msg));
            }
        }
    }
    Ok(tree)
}

/// Relative paths of all regular files under `root`, sorted.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = scan_source(root)?
        .files
        .into_iter()
        .map(|t| t.relative_path)
        .collect();
    files.sort();
    Ok(files)
}

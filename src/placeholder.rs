//! Placeholder content and the filesystem side of a task.

use anyhow::{Context, Result};
use rand::Rng;
use std::fs;
use std::path::Path;

use crate::utils::config::PLACEHOLDER_SIZE;
use crate::{Task, TaskKind};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `len` random ASCII letters.
pub fn placeholder_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())])
        .collect()
}

/// Write (or overwrite) a [`PLACEHOLDER_SIZE`] placeholder at `path`. The parent must exist.
pub fn write_placeholder(path: &Path) -> Result<()> {
    fs::write(path, placeholder_bytes(PLACEHOLDER_SIZE))
        .with_context(|| format!("write placeholder {}", path.display()))
}

/// Apply `task` under `dest_root`: create the directory, or write the placeholder file.
/// Both are safe to repeat.
pub fn materialize(task: &Task, dest_root: &Path) -> Result<()> {
    let target = task.target(dest_root);
    match task.kind {
        TaskKind::Directory => fs::create_dir_all(&target)
            .with_context(|| format!("create directory {}", target.display())),
        TaskKind::File => write_placeholder(&target),
    }
}

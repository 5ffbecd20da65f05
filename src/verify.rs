//! Post-run consistency check of source tree, destination tree and reported results.

use anyhow::Result;
use log::{debug, error};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::utils::config::PLACEHOLDER_SIZE;
use crate::walk::list_files;

/// One row of the sorted comparison where the three lists disagree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub reported: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Rows compared (length of the longest list).
    pub rows: usize,
    pub mismatches: Vec<Mismatch>,
    /// Destination files whose size is not the placeholder size.
    pub wrong_size: Vec<(PathBuf, u64)>,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.wrong_size.is_empty()
    }
}

/// Compare sorted source files, sorted destination files and sorted `reported` paths row by row,
/// and check every destination file is exactly one placeholder long. Mismatches are logged.
pub fn check(source: &Path, dest: &Path, reported: &[PathBuf]) -> Result<Verification> {
    let source_files = list_files(source)?;
    let dest_files = list_files(dest)?;
    let mut reported = reported.to_vec();
    reported.sort();

    let rows = source_files.len().max(dest_files.len()).max(reported.len());
    let mut mismatches = Vec::new();
    for index in 0..rows {
        let s = source_files.get(index);
        let d = dest_files.get(index);
        let r = reported.get(index);
        if s != d || s != r {
            mismatches.push(Mismatch {
                index,
                source: s.cloned(),
                destination: d.cloned(),
                reported: r.cloned(),
            });
        }
    }

    let mut wrong_size: Vec<(PathBuf, u64)> = dest_files
        .par_iter()
        .filter_map(|rel| {
            let len = std::fs::metadata(dest.join(rel)).map(|m| m.len()).unwrap_or(0);
            (len != PLACEHOLDER_SIZE as u64).then(|| (rel.clone(), len))
        })
        .collect();
    wrong_size.sort();

    let verification = Verification {
        rows,
        mismatches,
        wrong_size,
    };
    log_verification(&verification);
    Ok(verification)
}

fn show(p: Option<&PathBuf>) -> String {
    p.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn log_verification(v: &Verification) {
    for m in &v.mismatches {
        error!(
            "Mismatch at {}: source={} destination={} reported={}",
            m.index,
            show(m.source.as_ref()),
            show(m.destination.as_ref()),
            show(m.reported.as_ref())
        );
    }
    for (path, len) in &v.wrong_size {
        error!(
            "{} is {} bytes, expected {}",
            path.display(),
            len,
            PLACEHOLDER_SIZE
        );
    }
    if v.is_consistent() {
        debug!("Verified {} files", v.rows);
    }
}

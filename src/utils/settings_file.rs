//! Load `dirmirage.toml` (CLI only). Library callers build [`Opts`] themselves.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::PackagePaths;
use crate::{Opts, ReceiverMode};

#[derive(Debug, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsSection {
    pub num_workers: Option<usize>,
    pub receiver: Option<ReceiverMode>,
    /// Seconds.
    pub join_timeout: Option<u64>,
    pub queue_cap: Option<usize>,
    pub prefetch: Option<usize>,
    pub log: Option<String>,
    pub verify: Option<bool>,
}

/// Where to look for the settings file: `explicit` if given, else `dirmirage.toml` in the current dir.
pub fn settings_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()))
}

/// Load the settings file. A missing default file is `Ok(None)`; a missing explicit file or a file
/// that does not parse is an error (the CLI reports it and carries on without the file).
pub fn load_settings(explicit: Option<&Path>) -> Result<Option<SettingsFile>> {
    let path = settings_path(explicit);
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    parse_settings(&s)
        .map(Some)
        .with_context(|| format!("parse {}", path.display()))
}

pub fn parse_settings(s: &str) -> std::result::Result<SettingsFile, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file values to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &SettingsFile, opts: &mut Opts) {
    let sec = &file.settings;
    apply_file_opt!(sec, opts, num_workers => num_workers);
    apply_file_opt!(sec, opts, receiver => receiver_mode);
    apply_file_opt!(sec, opts, queue_cap => queue_cap);
    apply_file_opt!(sec, opts, prefetch => prefetch);
    apply_file_opt!(sec, opts, verify => verify);
    if let Some(secs) = sec.join_timeout {
        opts.join_timeout = Duration::from_secs(secs);
    }
}

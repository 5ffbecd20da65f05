//! dirmirage: mirror a directory tree as fixed-size placeholder files using a pool of worker
//! processes, a switchable thread/process receiver and a single log aggregator.

pub mod engine;
pub mod pipeline;
pub mod placeholder;
pub mod types;
pub mod utils;
pub mod verify;
pub mod walk;

/// Re-export types for API
pub use types::*;

pub use pipeline::{CancelToken, CaptureSink, FacadeSink, LogSink};

use log::debug;
use std::path::Path;

/// Result alias used by public dirmirage API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: mirror `source` into `dest` with `opts`.
///
/// - **`sink: None`** → worker and coordinator records go through the `log` facade
///   ([`FacadeSink`]), i.e. whatever logger the process installed.
/// - **`sink: Some(s)`** → records go to `s` only; useful for capturing them ([`CaptureSink`]).
///
/// `Err` means setup failed (bad roots, unreadable source, worker or receiver could not start).
/// Setting `cancel` from any thread ends the run with [`RunOutcome::Cancelled`].
///
/// Workers and the process receiver are the `dirmirage` binary re-launched with a hidden
/// subcommand. Outside that binary, set [`Opts::worker_program`] to its path; with `None` the
/// run fails at setup.
///
/// ```ignore
/// let cancel = dirmirage::CancelToken::new();
/// let outcome = dirmirage::mirror_dir(src, dst, &dirmirage::Opts::default(), &cancel, None)?;
/// println!("{} created", outcome.summary().succeeded);
/// ```
pub fn mirror_dir(
    source: &Path,
    dest: &Path,
    opts: &Opts,
    cancel: &CancelToken,
    sink: Option<Box<dyn LogSink>>,
) -> Result<RunOutcome> {
    let config_str = format!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    debug!("{}", config_str);

    let sink = sink.unwrap_or_else(|| Box::new(FacadeSink));
    pipeline::run(source, dest, opts, cancel, sink)
}

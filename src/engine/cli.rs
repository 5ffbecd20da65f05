//! CLI command handler: mirror by default; hidden `worker` / `receiver` roles for child processes.

use anyhow::Result;
use log::{LevelFilter, debug, error, info, warn};
use std::path::Path;
use std::process::ExitCode;

use crate::engine::arg_parser::{Cli, Role};
use crate::pipeline::{CancelToken, receiver_process_main, worker_process_main};
use crate::utils::config::{CHILD_LOG_LEVEL, DEFAULT_LOG_LEVEL, ExitCodes};
use crate::utils::{Colors, SettingsFile, apply_file_to_opts, load_settings, parse_level, setup_logging};
use crate::{Opts, RunOutcome, Summary, mirror_dir, verify};

/// Dispatch on the role and map the result to a process exit code.
pub fn handle_cli(cli: &Cli) -> ExitCode {
    match &cli.role {
        Some(Role::Worker { id, dest }) => {
            setup_child_logging();
            child_exit(worker_process_main(*id, dest))
        }
        Some(Role::Receiver { workers }) => {
            setup_child_logging();
            child_exit(receiver_process_main(*workers))
        }
        None => handle_run(cli),
    }
}

fn child_exit(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(ExitCodes::SETUP_FAILURE)
        }
    }
}

/// Child processes log warnings to their inherited stderr.
fn setup_child_logging() {
    let _ = setup_logging(CHILD_LOG_LEVEL, None);
}

fn resolve_level(cli: &Cli, file: Option<&SettingsFile>) -> (LevelFilter, Option<anyhow::Error>) {
    let requested = cli
        .log
        .clone()
        .or_else(|| cli.verbose.then(|| "debug".to_string()))
        .or_else(|| file.and_then(|f| f.settings.log.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    match parse_level(&requested) {
        Ok(level) => (level, None),
        Err(e) => (LevelFilter::Info, Some(e)),
    }
}

/// Defaults, then the settings file, then CLI flags.
pub fn build_opts(cli: &Cli, file: Option<&SettingsFile>) -> Opts {
    let mut opts = Opts::default();
    if let Some(f) = file {
        apply_file_to_opts(f, &mut opts);
    }
    if let Some(n) = cli.num_workers {
        opts.num_workers = n;
    }
    if let Some(mode) = cli.receiver {
        opts.receiver_mode = mode;
    }
    if let Some(secs) = cli.join_timeout {
        opts.join_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(cap) = cli.queue_cap {
        opts.queue_cap = cap;
    }
    if let Some(p) = cli.prefetch {
        opts.prefetch = p;
    }
    if cli.no_verify {
        opts.verify = false;
    }
    opts
}

/// Mirror `IN_DIR` into `OUT_DIR`, print the summary, verify, and pick the exit code.
pub fn handle_run(cli: &Cli) -> ExitCode {
    let setup_failure = ExitCode::from(ExitCodes::SETUP_FAILURE);
    let (Some(in_dir), Some(out_dir)) = (cli.in_dir.as_deref(), cli.out_dir.as_deref()) else {
        return setup_failure;
    };

    let loaded = load_settings(cli.config.as_deref());
    let file = loaded.as_ref().ok().and_then(Option::as_ref);
    let (level, bad_level) = resolve_level(cli, file);
    if let Err(e) = setup_logging(level, cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        return setup_failure;
    }
    if let Err(e) = &loaded {
        warn!("Ignoring settings file: {e:#}");
    }
    if let Some(e) = bad_level {
        warn!("{e:#}; using info");
    }

    let opts = build_opts(cli, file);
    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_ctrlc(i32::from(ExitCodes::CANCELLED)) {
        warn!("Could not set Ctrl+C handler: {e}");
    }

    info!("Start running");
    match mirror_dir(in_dir, out_dir, &opts, &cancel, None) {
        Err(e) => {
            error!("{e:#}");
            setup_failure
        }
        Ok(RunOutcome::Cancelled(summary)) => {
            print_summary(&summary, true);
            warn!("Keyboard interrupt occurred. Exiting");
            ExitCode::from(ExitCodes::CANCELLED)
        }
        Ok(RunOutcome::Completed(summary)) => {
            print_summary(&summary, false);
            let consistent = !opts.verify || verify_run(in_dir, out_dir, &summary);
            info!("Finished running");
            if summary.failed == 0 && consistent {
                ExitCode::from(ExitCodes::SUCCESS)
            } else {
                ExitCode::from(ExitCodes::TASK_FAILURES)
            }
        }
    }
}

fn verify_run(in_dir: &Path, out_dir: &Path, summary: &Summary) -> bool {
    debug!("Verifying {}...", out_dir.display());
    match verify::check(in_dir, out_dir, &summary.succeeded_paths()) {
        Ok(v) => v.is_consistent(),
        Err(e) => {
            error!("Verification failed: {e:#}");
            false
        }
    }
}

fn print_summary(summary: &Summary, cancelled: bool) {
    for (path, detail) in &summary.errors {
        error!("{}: {}", path.display(), detail);
    }
    let status = if cancelled {
        format!(" | {}", Colors::colorize(Colors::CANCELLED, "Cancelled"))
    } else {
        String::new()
    };
    info!(
        "{} | {}{}",
        Colors::colorize(Colors::SUCCEEDED, &format!("Created: {}", summary.succeeded)),
        Colors::colorize(Colors::FAILED, &format!("Failed: {}", summary.failed)),
        status
    );
}

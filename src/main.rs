//! dirmirage CLI: mirror a directory as placeholder files; also the worker and receiver processes.

use clap::Parser;
use dirmirage::engine::{Cli, handle_cli};
use std::process::ExitCode;
use std::time::Instant;

fn main() -> ExitCode {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let code = handle_cli(&cli);
    log::debug!("Total time: {:?}", start_time.elapsed());
    code
}

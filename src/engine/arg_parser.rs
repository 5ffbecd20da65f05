use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::{ReceiverMode, WorkerId};

/// Mirror a directory tree as 1 KiB placeholder files, written by a pool of worker processes.
#[derive(Clone, Parser)]
#[command(name = "dirmirage")]
#[command(about = "Mirror IN_DIR into OUT_DIR with a 1 KiB placeholder in place of every file.")]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct Cli {
    #[command(subcommand)]
    pub role: Option<Role>,

    /// Source directory.
    #[arg(value_name = "IN_DIR", required = true)]
    pub in_dir: Option<PathBuf>,

    /// Destination directory. Created if missing; existing placeholders are overwritten.
    #[arg(value_name = "OUT_DIR", required = true)]
    pub out_dir: Option<PathBuf>,

    /// Number of worker processes. Default: available threads, capped at 16.
    #[arg(long, short = 'n', value_parser = clap::value_parser!(usize))]
    pub num_workers: Option<usize>,

    /// Run the receiver as a thread in this process or as a separate process.
    #[arg(long, short = 'r', value_enum)]
    pub receiver: Option<ReceiverMode>,

    /// Seconds to wait for each component at shutdown before killing it.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64))]
    pub join_timeout: Option<u64>,

    /// Task queue capacity.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub queue_cap: Option<usize>,

    /// Tasks handed to one worker before it has to report back.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub prefetch: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Verbose output (same as --log debug).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Write the log to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Settings file. Default: dirmirage.toml in the current directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip the post-run comparison of source, destination and reported results.
    #[arg(long)]
    pub no_verify: bool,
}

/// Child-process entry points; the coordinator re-launches its own executable with these.
#[derive(Clone, Subcommand)]
pub enum Role {
    /// Worker process: task frames on stdin, result and log frames on stdout.
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        id: WorkerId,
        #[arg(long)]
        dest: PathBuf,
    },
    /// Receiver process: result messages on stdin, one tally line on stdout.
    #[command(hide = true)]
    Receiver {
        #[arg(long)]
        workers: usize,
    },
}

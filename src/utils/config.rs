//! Application configuration constants.
//! Tuning and thresholds in one place.

use log::LevelFilter;
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    worker_log_target: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!("{pkg}.toml"),
                worker_log_target: format!("{pkg}::worker"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the current directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Log target used when re-emitting records received from worker processes.
    pub fn worker_log_target(&self) -> &str {
        &self.worker_log_target
    }
}

// ---- Logging ----

/// Level used when neither `--log`, `-v` nor the settings file picks one.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Level child processes log at on their own stderr; their records normally travel as frames.
pub const CHILD_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

// ---- Child process roles ----

/// Hidden subcommands the binary is re-launched with.
pub struct Roles;

impl Roles {
    pub const WORKER: &'static str = "worker";
    pub const RECEIVER: &'static str = "receiver";
}

// ---- Placeholder ----

/// Size of every placeholder file (bytes).
pub const PLACEHOLDER_SIZE: usize = 1024;

// ---- Worker processes ----

/// Limits for the default worker count.
/// Use [`WorkerLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerLimits {
    /// Available threads (from rayon); set by [`WorkerLimits::current()`].
    pub all_threads: usize,
    pub floor: usize,
    pub max: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            all_threads: 0,
            floor: Self::FLOOR_WORKERS,
            max: Self::MAX_WORKERS,
        }
    }
}

impl WorkerLimits {
    pub const FLOOR_WORKERS: usize = 1;
    /// Each worker is a full OS process; more than this rarely helps a 1 KB write.
    pub const MAX_WORKERS: usize = 16;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    pub fn default_workers(&self) -> usize {
        self.all_threads.clamp(self.floor, self.max)
    }
}

// ---- Queues ----

pub struct QueueConsts;

impl QueueConsts {
    /// Task queue capacity. Result and log queues are unbounded.
    pub const DEFAULT_TASK_CAP: usize = 1024;
    /// Tasks in flight per worker before the feeder waits for a result.
    pub const DEFAULT_PREFETCH: usize = 4;
}

// ---- Timeouts ----

pub struct TimeoutConsts;

impl TimeoutConsts {
    /// Bound for joining each component at shutdown (seconds).
    pub const DEFAULT_JOIN_SECS: u64 = 10;
    /// How often blocking queue operations wake up to look at the cancel flag.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
}

// ---- Exit codes ----

pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    /// Completed, but some tasks failed or the result did not verify.
    pub const TASK_FAILURES: u8 = 1;
    pub const SETUP_FAILURE: u8 = 2;
    pub const CANCELLED: u8 = 130;
}

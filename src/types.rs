//! Public and internal types for the dirmirage API and pipeline.

use chrono::{DateTime, Utc};
use log::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::config::{QueueConsts, TimeoutConsts, WorkerLimits};

/// Index of a worker process inside the pool (0-based).
pub type WorkerId = usize;

/// What a [`Task`] mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    File,
    Directory,
}

/// One unit of mirroring work. `relative_path` is relative to both the source and destination roots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(with = "crate::pipeline::wire_path")]
    pub relative_path: PathBuf,
    pub kind: TaskKind,
}

impl Task {
    pub fn file(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: TaskKind::File,
        }
    }

    pub fn directory(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind: TaskKind::Directory,
        }
    }

    /// Absolute path of this task under `dest_root`.
    pub fn target(&self, dest_root: &Path) -> PathBuf {
        dest_root.join(&self.relative_path)
    }
}

/// Outcome of one attempted task. Failures carry the I/O error text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure { detail: String },
}

/// Emitted by a worker after attempting a task; consumed once by the receiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    #[serde(with = "crate::pipeline::wire_path")]
    pub relative_path: PathBuf,
    pub outcome: Outcome,
    pub worker_id: WorkerId,
}

impl ResultEvent {
    pub fn success(relative_path: PathBuf, worker_id: WorkerId) -> Self {
        Self {
            relative_path,
            outcome: Outcome::Success,
            worker_id,
        }
    }

    pub fn failure(relative_path: PathBuf, worker_id: WorkerId, detail: impl Into<String>) -> Self {
        Self {
            relative_path,
            outcome: Outcome::Failure {
                detail: detail.into(),
            },
            worker_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { detail } => Some(detail),
        }
    }
}

/// Structured log record travelling on the log queue. `worker_id: None` means the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub worker_id: Option<WorkerId>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: Level, worker_id: Option<WorkerId>, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            worker_id,
            timestamp: Utc::now(),
        }
    }

    /// Short label of the producing entity, e.g. `worker 3` or `coordinator`.
    pub fn origin(&self) -> String {
        match self.worker_id {
            Some(id) => format!("worker {id}"),
            None => "coordinator".to_string(),
        }
    }
}

/// Final tally of a run.
///
/// `arrivals` lists every reported path in the order the receiver drained it, so a single-worker
/// run can be checked against submission order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    #[serde(with = "crate::pipeline::wire_path::with_detail")]
    pub errors: Vec<(PathBuf, String)>,
    #[serde(with = "crate::pipeline::wire_path::list")]
    pub arrivals: Vec<PathBuf>,
}

impl Summary {
    /// Count one result event.
    pub fn record(&mut self, event: ResultEvent) {
        match event.outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure { detail } => {
                self.failed += 1;
                self.errors.push((event.relative_path.clone(), detail));
            }
        }
        self.arrivals.push(event.relative_path);
    }

    /// Count every path in `submitted` that never produced an event as a failure with `detail`.
    /// Returns how many were added.
    pub fn fail_unreported(&mut self, submitted: &[PathBuf], detail: &str) -> usize {
        let reported: HashSet<&PathBuf> = self.arrivals.iter().collect();
        let lost: Vec<PathBuf> = submitted
            .iter()
            .filter(|p| !reported.contains(p))
            .cloned()
            .collect();
        for path in &lost {
            self.failed += 1;
            self.errors.push((path.clone(), detail.to_string()));
            self.arrivals.push(path.clone());
        }
        lost.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Paths reported as successfully created.
    pub fn succeeded_paths(&self) -> Vec<PathBuf> {
        let failed: HashSet<&PathBuf> =
            self.errors.iter().map(|(p, _)| p).collect();
        self.arrivals
            .iter()
            .filter(|p| !failed.contains(p))
            .cloned()
            .collect()
    }
}

/// Terminal outcome of [`mirror_dir`](crate::mirror_dir). Setup failures are the `Err` side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker acknowledged its sentinel.
    Completed(Summary),
    /// Operator-requested cancellation; the summary holds whatever was tallied before shutdown.
    Cancelled(Summary),
}

impl RunOutcome {
    pub fn summary(&self) -> &Summary {
        match self {
            RunOutcome::Completed(s) | RunOutcome::Cancelled(s) => s,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled(_))
    }
}

/// Execution model of the receiver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverMode {
    /// A thread inside the coordinator process (shared tally behind a lock).
    #[default]
    Thread,
    /// A separate child process reporting its tally over a pipe.
    Process,
}

impl fmt::Display for ReceiverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverMode::Thread => f.write_str("thread"),
            ReceiverMode::Process => f.write_str("process"),
        }
    }
}

/// Options for [`mirror_dir`](crate::mirror_dir).
#[derive(Clone, Debug)]
pub struct Opts {
    /// Number of worker processes (at least 1).
    pub num_workers: usize,
    /// Receiver execution model.
    pub receiver_mode: ReceiverMode,
    /// Bound for every join during shutdown; components still running afterwards are killed.
    pub join_timeout: Duration,
    /// Capacity of the task queue.
    pub queue_cap: usize,
    /// Tasks handed to one worker before it must report back.
    pub prefetch: usize,
    /// Executable re-launched for worker and receiver processes; it must accept the hidden
    /// `worker` and `receiver` subcommands of the `dirmirage` binary. `None` uses the current
    /// executable, which is only right inside that binary: library callers must point this at
    /// an installed `dirmirage`, otherwise setup fails.
    pub worker_program: Option<PathBuf>,
    /// Run the post-run consistency check (CLI only).
    pub verify: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            num_workers: WorkerLimits::current().default_workers(),
            receiver_mode: ReceiverMode::default(),
            join_timeout: Duration::from_secs(TimeoutConsts::DEFAULT_JOIN_SECS),
            queue_cap: QueueConsts::DEFAULT_TASK_CAP,
            prefetch: QueueConsts::DEFAULT_PREFETCH,
            worker_program: None,
            verify: true,
        }
    }
}

//! Coordinator: setup, directory skeleton, dispatch, wait, and the two shutdown paths.
//!
//! Source walk → skeleton (sequential) → task queue → worker processes → result/log queues →
//! receiver → tally.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::cancel::CancelToken;
use super::logs::{LogHandle, LogSink};
use super::pool::{PoolChannels, WorkerPool, WorkerSpec};
use super::protocol::{ResultMessage, TaskFrame};
use super::queues::{Queues, create_queues};
use super::receiver::{DrainHandle, DrainInputs, drainer_for};
use super::shutdown::JoinReport;
use super::tally::Tally;
use crate::engine::tools::{check_roots_disjoint, check_source_root, prepare_dest_root};
use crate::placeholder::materialize;
use crate::utils::config::TimeoutConsts;
use crate::walk::scan_source_until;
use crate::{Opts, RunOutcome, Summary, Task};

/// Mirror `source_root` into `dest_root`.
///
/// `Err` is a setup failure (or a failure to start the pipeline); nothing is left running.
/// Per-file failures end up in the summary. Setting `cancel` at any point shuts everything down
/// within roughly two join timeouts and yields [`RunOutcome::Cancelled`].
pub fn run(
    source_root: &Path,
    dest_root: &Path,
    opts: &Opts,
    cancel: &CancelToken,
    sink: Box<dyn LogSink>,
) -> Result<RunOutcome> {
    if opts.num_workers == 0 {
        bail!("worker count must be at least 1");
    }
    let program = resolve_program(opts)?;
    let source = check_source_root(source_root)?;
    let dest_abs = std::path::absolute(dest_root)
        .with_context(|| format!("resolve {}", dest_root.display()))?;
    check_roots_disjoint(&source, &dest_abs)?;
    let dest = prepare_dest_root(dest_root)?;
    check_roots_disjoint(&source, &dest)?;

    let tree = scan_source_until(&source, cancel)?;
    if !tree.skipped.is_empty() {
        warn!(
            "Skipped {} paths due to permission errors or access issues",
            tree.skipped.len()
        );
    }
    if tree.interrupted || !build_skeleton(&tree.directories, &dest, cancel)? {
        info!("Cancelled during setup; no workers were started");
        return Ok(RunOutcome::Cancelled(Summary::default()));
    }
    info!(
        "Mirroring {} files ({} directories) with {} workers, {} receiver",
        tree.files.len(),
        tree.directories.len(),
        opts.num_workers,
        opts.receiver_mode
    );

    dispatch(tree.files, &program, &dest, opts, cancel, sink)
}

/// Create every directory before any file task runs, so workers never miss a parent.
/// Returns `false` if `cancel` was set before the skeleton was complete.
pub fn build_skeleton(directories: &[Task], dest: &Path, cancel: &CancelToken) -> Result<bool> {
    for dir in directories {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        materialize(dir, dest)?;
    }
    debug!("Created {} directories under {}", directories.len(), dest.display());
    Ok(true)
}

/// Worker and receiver processes re-launch the `dirmirage` binary with a hidden subcommand.
/// Without an explicit program that only works from inside that binary.
fn resolve_program(opts: &Opts) -> Result<PathBuf> {
    if let Some(p) = &opts.worker_program {
        return Ok(p.clone());
    }
    let exe = std::env::current_exe().context("locate current executable")?;
    if exe.file_stem().is_some_and(|stem| stem == env!("CARGO_PKG_NAME")) {
        Ok(exe)
    } else {
        bail!(
            "{} is not the {} binary; set Opts::worker_program",
            exe.display(),
            env!("CARGO_PKG_NAME")
        )
    }
}

enum Waited {
    Tally(Tally),
    Cancelled,
}

fn dispatch(
    files: Vec<Task>,
    program: &Path,
    dest: &Path,
    opts: &Opts,
    cancel: &CancelToken,
    sink: Box<dyn LogSink>,
) -> Result<RunOutcome> {
    let worker_count = opts.num_workers;
    let total = files.len();
    let submitted: Vec<PathBuf> = files.iter().map(|t| t.relative_path.clone()).collect();
    let Queues {
        task_tx,
        task_rx,
        result_tx,
        result_rx,
        log_tx,
        log_rx,
    } = create_queues(opts.queue_cap);
    let coord_log = LogHandle::coordinator(log_tx.clone());
    // Feeders stop on `halt`; the caller's token is only read.
    let halt = CancelToken::new();

    let drainer = drainer_for(opts.receiver_mode, program);
    debug!("Starting {} receiver", drainer.mode());
    let drain = drainer.start(DrainInputs {
        results: result_rx,
        logs: log_rx,
        sink,
        worker_count,
    })?;

    let spec = WorkerSpec {
        program: program.to_path_buf(),
        dest_root: dest.to_path_buf(),
        prefetch: opts.prefetch,
    };
    let channels = PoolChannels {
        task_rx: task_rx.clone(),
        result_tx: result_tx.clone(),
        log_tx,
    };
    let mut pool = WorkerPool::new();
    let started = (0..worker_count).try_for_each(|id| pool.spawn(id, &spec, &channels, &halt));
    drop(channels);

    let waited = started.and_then(|()| {
        coord_log.info(format!(
            "{} workers started, {} receiver; dispatching {} tasks",
            pool.len(),
            opts.receiver_mode,
            total
        ));
        if !enqueue(&task_tx, files, worker_count, cancel, &pool)? {
            return Ok(Waited::Cancelled);
        }
        coord_log.debug(format!("enqueued {} tasks and {} sentinels", total, worker_count));
        wait_for_tally(drain.as_ref(), cancel)
    });
    drop(task_tx);

    let shutdown = Shutdown {
        pool,
        drain,
        halt,
        task_rx,
        result_tx,
        coord_log,
        opts,
    };
    match waited {
        Ok(Waited::Tally(tally)) => shutdown.finish(tally, &submitted),
        Ok(Waited::Cancelled) => shutdown.abort().map(RunOutcome::Cancelled),
        Err(e) => {
            let _ = shutdown.abort();
            Err(e)
        }
    }
}

/// Push every task, then one `Stop` per worker. Returns `false` if cancelled first.
fn enqueue(
    task_tx: &Sender<TaskFrame>,
    files: Vec<Task>,
    worker_count: usize,
    cancel: &CancelToken,
    pool: &WorkerPool,
) -> Result<bool> {
    for task in files {
        if !send_frame(task_tx, TaskFrame::Task(task), cancel, pool)? {
            return Ok(false);
        }
    }
    for _ in 0..worker_count {
        if !send_frame(task_tx, TaskFrame::Stop, cancel, pool)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn send_frame(
    task_tx: &Sender<TaskFrame>,
    mut frame: TaskFrame,
    cancel: &CancelToken,
    pool: &WorkerPool,
) -> Result<bool> {
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match task_tx.send_timeout(frame, TimeoutConsts::POLL_INTERVAL) {
            Ok(()) => return Ok(true),
            Err(SendTimeoutError::Timeout(f)) => {
                if pool.all_feeders_finished() {
                    bail!("all workers exited while tasks were still queued");
                }
                frame = f;
            }
            Err(SendTimeoutError::Disconnected(_)) => bail!("task queue closed"),
        }
    }
}

fn wait_for_tally(drain: &dyn DrainHandle, cancel: &CancelToken) -> Result<Waited> {
    loop {
        if cancel.is_cancelled() {
            return Ok(Waited::Cancelled);
        }
        match drain.tally_rx().recv_timeout(TimeoutConsts::POLL_INTERVAL) {
            Ok(tally) => return Ok(Waited::Tally(tally)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                bail!("receiver exited without reporting a tally")
            }
        }
    }
}

const LOST_DETAIL: &str = "lost with exited worker";

/// Everything still running once dispatch is over.
struct Shutdown<'a> {
    pool: WorkerPool,
    drain: Box<dyn DrainHandle>,
    halt: CancelToken,
    task_rx: Receiver<TaskFrame>,
    result_tx: Sender<ResultMessage>,
    coord_log: LogHandle,
    opts: &'a Opts,
}

impl Shutdown<'_> {
    fn deadline(&self) -> Instant {
        Instant::now() + self.opts.join_timeout
    }

    /// Normal completion: every worker acknowledged its sentinel. Tasks that never produced a
    /// result (held by a worker that died, or reported after its sentinel) count as failures.
    fn finish(self, tally: Tally, submitted: &[PathBuf]) -> Result<RunOutcome> {
        let deadline = self.deadline();
        let reports = self.pool.join_all(deadline, &self.halt);
        log_killed(&self.coord_log, &reports);

        let mut summary = tally.summary;
        if !tally.cancelled {
            let lost = summary.fail_unreported(submitted, LOST_DETAIL);
            if lost > 0 {
                self.coord_log
                    .warn(format!("{lost} tasks were lost with an exited worker"));
            }
        }
        self.coord_log.info(format!(
            "finished: {} created, {} failed",
            summary.succeeded, summary.failed
        ));

        let deadline = Instant::now() + self.opts.join_timeout;
        drop(self.coord_log);
        drop(self.result_tx);
        drop(self.task_rx);
        self.drain.join(deadline)?;

        Ok(if tally.cancelled {
            RunOutcome::Cancelled(summary)
        } else {
            RunOutcome::Completed(summary)
        })
    }

    /// Cancellation (or a failure after the pipeline started): stop feeding, discard pending
    /// tasks, let workers finish what they hold, then release the receiver with `Cancel`.
    fn abort(self) -> Result<Summary> {
        self.coord_log
            .warn("cancellation requested; shutting down workers and receiver");
        self.halt.cancel();
        let discarded = self
            .task_rx
            .try_iter()
            .filter(|f| matches!(f, TaskFrame::Task(_)))
            .count();
        if discarded > 0 {
            self.coord_log
                .info(format!("discarded {discarded} pending tasks"));
        }

        let deadline = self.deadline();
        let reports = self.pool.join_all(deadline, &self.halt);
        log_killed(&self.coord_log, &reports);

        let _ = self.result_tx.send(ResultMessage::Cancel);
        let deadline = Instant::now() + self.opts.join_timeout;
        let tally = match self.drain.tally_rx().recv_deadline(deadline) {
            Ok(tally) => tally,
            Err(_) => {
                warn!("receiver did not report a tally before the deadline");
                self.drain.snapshot().unwrap_or_default()
            }
        };
        self.coord_log.info(format!(
            "cancelled: {} created, {} failed before shutdown",
            tally.summary.succeeded, tally.summary.failed
        ));

        drop(self.coord_log);
        drop(self.result_tx);
        drop(self.task_rx);
        self.drain.join(deadline)?;
        Ok(tally.summary)
    }
}

fn log_killed(log: &LogHandle, reports: &[(usize, JoinReport)]) {
    for (id, report) in reports {
        if *report == JoinReport::Killed {
            log.warn(format!("worker {id} was killed after the join timeout"));
        }
    }
}

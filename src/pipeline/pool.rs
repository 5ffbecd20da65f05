//! Coordinator side of the worker processes: spawn, feed, pump, join.
//!
//! Each worker process gets two threads in the coordinator:
//! - a feeder that pulls frames from the shared task queue and writes them to the worker's stdin,
//!   keeping at most `prefetch` tasks in flight;
//! - a pump that reads the worker's stdout and routes `Result`/`Done` frames to the result queue
//!   and `Log` frames to the log queue. Both queues are unbounded, so the pump never blocks and
//!   the worker never stalls on a full stdout pipe.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{Level, debug};
use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::cancel::CancelToken;
use super::protocol::{
    ResultMessage, TaskFrame, WorkerFrame, encode_frame, read_frames, write_frame, write_line,
};
use super::shutdown::{JoinReport, join_until, wait_or_kill};
use crate::utils::config::{Roles, TimeoutConsts};
use crate::{LogRecord, ResultEvent, WorkerId};

/// What every worker process is launched with.
#[derive(Clone, Debug)]
pub struct WorkerSpec {
    pub program: PathBuf,
    pub dest_root: PathBuf,
    pub prefetch: usize,
}

/// Coordinator-held ends of the queues that the feeders and pumps use.
#[derive(Clone)]
pub struct PoolChannels {
    pub task_rx: Receiver<TaskFrame>,
    pub result_tx: Sender<ResultMessage>,
    pub log_tx: Sender<LogRecord>,
}

/// Why a feeder stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeederExit {
    /// Forwarded the worker's `Stop` sentinel.
    Stopped,
    /// Halt requested; stdin closed without a sentinel.
    Halted,
    /// Worker no longer accepts input.
    WorkerGone,
    /// Task queue closed.
    QueueClosed,
}

struct WorkerProcess {
    id: WorkerId,
    child: Child,
    feeder: JoinHandle<FeederExit>,
    pump: JoinHandle<()>,
}

/// The pool of worker processes.
#[derive(Default)]
pub struct WorkerPool {
    workers: Vec<WorkerProcess>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Launch worker `id` and its feeder and pump threads.
    pub fn spawn(
        &mut self,
        id: WorkerId,
        spec: &WorkerSpec,
        channels: &PoolChannels,
        halt: &CancelToken,
    ) -> Result<()> {
        let mut child = Command::new(&spec.program)
            .arg(Roles::WORKER)
            .arg("--id")
            .arg(id.to_string())
            .arg("--dest")
            .arg(&spec.dest_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn worker {} ({})", id, spec.program.display()))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("worker {id}: stdio was not captured");
        };
        debug!("Spawned worker {} (pid {})", id, child.id());

        let (credit_tx, credit_rx) = unbounded::<()>();
        let feeder = {
            let ctx = FeederCtx {
                worker_id: id,
                stdin,
                task_rx: channels.task_rx.clone(),
                result_tx: channels.result_tx.clone(),
                credit_rx,
                prefetch: spec.prefetch.max(1),
                halt: halt.clone(),
            };
            thread::spawn(move || feeder_loop(ctx))
        };
        let pump = {
            let result_tx = channels.result_tx.clone();
            let log_tx = channels.log_tx.clone();
            thread::spawn(move || pump_loop(id, stdout, result_tx, log_tx, credit_tx))
        };

        self.workers.push(WorkerProcess {
            id,
            child,
            feeder,
            pump,
        });
        Ok(())
    }

    /// True when no feeder is left to take frames off the task queue.
    pub fn all_feeders_finished(&self) -> bool {
        self.workers.iter().all(|w| w.feeder.is_finished())
    }

    /// Wait for every worker until `deadline`, killing the ones still running, then join feeder
    /// and pump threads. `halt` is set once all children are gone so idle feeders exit.
    pub fn join_all(self, deadline: Instant, halt: &CancelToken) -> Vec<(WorkerId, JoinReport)> {
        let mut reports = Vec::with_capacity(self.workers.len());
        let mut threads = Vec::with_capacity(self.workers.len());
        for mut w in self.workers {
            let label = format!("worker {}", w.id);
            let report = wait_or_kill(&mut w.child, deadline, &label).unwrap_or_else(|e| {
                log::warn!("{label}: {e:#}");
                let _ = w.child.kill();
                let _ = w.child.wait();
                JoinReport::Killed
            });
            reports.push((w.id, report));
            threads.push((w.id, w.feeder, w.pump));
        }
        halt.cancel();
        for (id, feeder, pump) in threads {
            if let Some(exit) = join_until(feeder, deadline, &format!("feeder {id}")) {
                debug!("feeder {} ended: {:?}", id, exit);
            }
            join_until(pump, deadline, &format!("pump {id}"));
        }
        reports
    }
}

struct FeederCtx {
    worker_id: WorkerId,
    stdin: ChildStdin,
    task_rx: Receiver<TaskFrame>,
    result_tx: Sender<ResultMessage>,
    credit_rx: Receiver<()>,
    prefetch: usize,
    halt: CancelToken,
}

/// Dropping `stdin` on return closes the worker's input; a worker treats that as "stop".
fn feeder_loop(mut ctx: FeederCtx) -> FeederExit {
    let mut in_flight = 0_usize;
    loop {
        if ctx.halt.is_cancelled() {
            return FeederExit::Halted;
        }
        while ctx.credit_rx.try_recv().is_ok() {
            in_flight = in_flight.saturating_sub(1);
        }
        if in_flight >= ctx.prefetch {
            match ctx.credit_rx.recv_timeout(TimeoutConsts::POLL_INTERVAL) {
                Ok(()) => in_flight -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return FeederExit::WorkerGone,
            }
            continue;
        }
        match ctx.task_rx.recv_timeout(TimeoutConsts::POLL_INTERVAL) {
            Ok(TaskFrame::Stop) => {
                let _ = write_frame(&mut ctx.stdin, &TaskFrame::Stop);
                return FeederExit::Stopped;
            }
            Ok(frame @ TaskFrame::Task(_)) => {
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        // Only this task is affected; the worker keeps its input.
                        report_unsent(&ctx, frame, format!("cannot encode task: {e:#}"));
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut ctx.stdin, &line) {
                    let detail = format!("worker {} unavailable: {e:#}", ctx.worker_id);
                    report_unsent(&ctx, frame, detail);
                    return FeederExit::WorkerGone;
                }
                in_flight += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return FeederExit::QueueClosed,
        }
    }
}

/// The task left the queue without reaching the worker; report it so it is not silently lost.
fn report_unsent(ctx: &FeederCtx, frame: TaskFrame, detail: String) {
    if let TaskFrame::Task(task) = frame {
        let _ = ctx.result_tx.send(ResultMessage::Event(ResultEvent::failure(
            task.relative_path,
            ctx.worker_id,
            detail,
        )));
    }
}

/// Route the worker's output frames until its stdout closes. A worker that dies without `Done`
/// still gets its sentinel counted, so the receiver never waits for it.
fn pump_loop(
    worker_id: WorkerId,
    stdout: ChildStdout,
    result_tx: Sender<ResultMessage>,
    log_tx: Sender<LogRecord>,
    credit_tx: Sender<()>,
) {
    let mut saw_done = false;
    for frame in read_frames::<_, WorkerFrame>(BufReader::new(stdout)) {
        match frame {
            Ok(WorkerFrame::Result(event)) => {
                let _ = credit_tx.send(());
                let _ = result_tx.send(ResultMessage::Event(event));
            }
            Ok(WorkerFrame::Log(record)) => {
                let _ = log_tx.send(record);
            }
            Ok(WorkerFrame::Done { worker_id: id }) => {
                saw_done = true;
                let _ = result_tx.send(ResultMessage::WorkerDone { worker_id: id });
            }
            Err(e) => {
                let _ = log_tx.send(LogRecord::new(
                    Level::Warn,
                    Some(worker_id),
                    format!("unreadable output: {e:#}"),
                ));
            }
        }
    }
    if !saw_done {
        let _ = log_tx.send(LogRecord::new(
            Level::Warn,
            Some(worker_id),
            "exited without acknowledging its sentinel",
        ));
        let _ = result_tx.send(ResultMessage::WorkerDone { worker_id });
    }
}

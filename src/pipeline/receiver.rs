//! The receiver: keeps the result queue drained while workers run.
//!
//! [`Drainer`] is the capability the coordinator depends on. Two variants implement it:
//! [`ThreadDrainer`] runs inside the coordinator process and shares its tally behind a lock;
//! [`ProcessDrainer`] runs `dirmirage receiver` as a child process that shares nothing and
//! reports its tally as one JSON line on stdout.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvError, Sender, bounded, select};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::cancel::CancelToken;
use super::logs::{LogSink, aggregate, spawn_log_aggregator};
use super::protocol::{ResultMessage, read_frames, write_frame};
use super::shutdown::{join_until, wait_or_kill};
use super::tally::{DrainState, Tally, drain};
use crate::utils::config::Roles;
use crate::{LogRecord, ReceiverMode};

/// What a receiver consumes. The receiver also becomes responsible for draining `logs` into
/// `sink`, either itself (thread mode) or through a dedicated aggregator thread (process mode).
pub struct DrainInputs {
    pub results: Receiver<ResultMessage>,
    pub logs: Receiver<LogRecord>,
    pub sink: Box<dyn LogSink>,
    pub worker_count: usize,
}

/// A receiver that can be started. Consumes `worker_count` sentinels (or a cancel) from the
/// result queue and delivers one [`Tally`].
pub trait Drainer {
    fn mode(&self) -> ReceiverMode;

    fn start(self: Box<Self>, inputs: DrainInputs) -> Result<Box<dyn DrainHandle>>;
}

/// A running receiver.
pub trait DrainHandle {
    /// Delivers exactly one tally when the receiver reaches a terminal state. Disconnects without
    /// a value if the receiver died.
    fn tally_rx(&self) -> &Receiver<Tally>;

    /// Tally so far, where memory is shared with the coordinator (thread mode only).
    fn snapshot(&self) -> Option<Tally>;

    /// Wait for the receiver (and its log draining) to finish, killing it after `deadline`.
    fn join(self: Box<Self>, deadline: Instant) -> Result<()>;
}

pub fn drainer_for(mode: ReceiverMode, program: &Path) -> Box<dyn Drainer> {
    match mode {
        ReceiverMode::Thread => Box::new(ThreadDrainer),
        ReceiverMode::Process => Box::new(ProcessDrainer {
            program: program.to_path_buf(),
        }),
    }
}

fn lock(tally: &Mutex<Tally>) -> MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(|e| e.into_inner())
}

// ---- Thread mode ----

pub struct ThreadDrainer;

struct ThreadDrainHandle {
    tally_rx: Receiver<Tally>,
    shared: Arc<Mutex<Tally>>,
    handle: JoinHandle<usize>,
}

impl Drainer for ThreadDrainer {
    fn mode(&self) -> ReceiverMode {
        ReceiverMode::Thread
    }

    fn start(self: Box<Self>, inputs: DrainInputs) -> Result<Box<dyn DrainHandle>> {
        let shared = Arc::new(Mutex::new(Tally::default()));
        let (tally_tx, tally_rx) = bounded::<Tally>(1);
        let shared_t = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("receiver".into())
            .spawn(move || drain_thread(inputs, shared_t, tally_tx))
            .context("spawn receiver thread")?;
        Ok(Box::new(ThreadDrainHandle {
            tally_rx,
            shared,
            handle,
        }))
    }
}

impl DrainHandle for ThreadDrainHandle {
    fn tally_rx(&self) -> &Receiver<Tally> {
        &self.tally_rx
    }

    fn snapshot(&self) -> Option<Tally> {
        Some(lock(&self.shared).clone())
    }

    fn join(self: Box<Self>, deadline: Instant) -> Result<()> {
        if let Some(records) = join_until(self.handle, deadline, "receiver") {
            debug!("receiver thread emitted {} log records", records);
        }
        Ok(())
    }
}

enum Drained {
    Result(Result<ResultMessage, RecvError>),
    Log(Result<LogRecord, RecvError>),
}

/// Drain results and logs together until the tally is terminal, hand the tally over, then keep
/// emitting logs until every log producer is gone. Returns the number of records emitted.
fn drain_thread(inputs: DrainInputs, shared: Arc<Mutex<Tally>>, tally_tx: Sender<Tally>) -> usize {
    let DrainInputs {
        results,
        logs,
        mut sink,
        worker_count,
    } = inputs;
    let mut emitted = 0_usize;
    let mut logs_open = true;

    if lock(&shared).state(worker_count) == DrainState::Draining {
        loop {
            let next = if logs_open {
                select! {
                    recv(results) -> msg => Drained::Result(msg),
                    recv(logs) -> rec => Drained::Log(rec),
                }
            } else {
                Drained::Result(results.recv())
            };
            match next {
                Drained::Result(Ok(msg)) => {
                    if lock(&shared).apply(msg, worker_count) != DrainState::Draining {
                        break;
                    }
                }
                Drained::Result(Err(_)) => {
                    lock(&shared).cancelled = true;
                    break;
                }
                Drained::Log(Ok(record)) => {
                    sink.emit(&record);
                    emitted += 1;
                }
                Drained::Log(Err(_)) => logs_open = false,
            }
        }
    }

    let _ = tally_tx.send(lock(&shared).clone());
    if logs_open {
        emitted += aggregate(&logs, sink.as_mut());
    } else {
        sink.flush();
    }
    emitted
}

// ---- Process mode ----

pub struct ProcessDrainer {
    pub program: PathBuf,
}

struct ProcessDrainHandle {
    child: Child,
    tally_rx: Receiver<Tally>,
    bridge: JoinHandle<()>,
    reader: JoinHandle<()>,
    aggregator: JoinHandle<usize>,
}

impl Drainer for ProcessDrainer {
    fn mode(&self) -> ReceiverMode {
        ReceiverMode::Process
    }

    fn start(self: Box<Self>, inputs: DrainInputs) -> Result<Box<dyn DrainHandle>> {
        let DrainInputs {
            results,
            logs,
            sink,
            worker_count,
        } = inputs;
        let mut child = Command::new(&self.program)
            .arg(Roles::RECEIVER)
            .arg("--workers")
            .arg(worker_count.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn receiver ({})", self.program.display()))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("receiver: stdio was not captured");
        };
        debug!("Spawned receiver process (pid {})", child.id());

        let (tally_tx, tally_rx) = bounded::<Tally>(1);
        let bridge = thread::spawn(move || bridge_loop(results, stdin, worker_count));
        let reader = thread::spawn(move || {
            for frame in read_frames::<_, Tally>(BufReader::new(stdout)) {
                match frame {
                    Ok(tally) => {
                        let _ = tally_tx.send(tally);
                        break;
                    }
                    Err(e) => warn!("receiver output: {e:#}"),
                }
            }
        });
        let aggregator = spawn_log_aggregator(logs, sink);

        Ok(Box::new(ProcessDrainHandle {
            child,
            tally_rx,
            bridge,
            reader,
            aggregator,
        }))
    }
}

/// Forward the result queue into the receiver process until it has everything it needs.
fn bridge_loop(results: Receiver<ResultMessage>, mut stdin: ChildStdin, worker_count: usize) {
    let mut done = 0_usize;
    for msg in results.iter() {
        let terminal = match &msg {
            ResultMessage::WorkerDone { .. } => {
                done += 1;
                done >= worker_count
            }
            ResultMessage::Cancel => true,
            ResultMessage::Event(_) => false,
        };
        if let Err(e) = write_frame(&mut stdin, &msg) {
            warn!("receiver process stopped accepting results: {e:#}");
            return;
        }
        if terminal {
            return;
        }
    }
}

impl DrainHandle for ProcessDrainHandle {
    fn tally_rx(&self) -> &Receiver<Tally> {
        &self.tally_rx
    }

    fn snapshot(&self) -> Option<Tally> {
        None
    }

    fn join(self: Box<Self>, deadline: Instant) -> Result<()> {
        let ProcessDrainHandle {
            mut child,
            tally_rx: _,
            bridge,
            reader,
            aggregator,
        } = *self;
        wait_or_kill(&mut child, deadline, "receiver process")?;
        join_until(bridge, deadline, "receiver bridge");
        join_until(reader, deadline, "receiver reader");
        if let Some(records) = join_until(aggregator, deadline, "log aggregator") {
            debug!("log aggregator emitted {} records", records);
        }
        Ok(())
    }
}

// ---- Receiver process ----

/// Receiver process loop: drain result messages from `input`, then write the tally to `output`.
pub fn receive<R: BufRead, W: Write>(input: R, mut output: W, worker_count: usize) -> Result<Tally> {
    let messages = read_frames::<_, ResultMessage>(input).filter_map(|frame| match frame {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("receiver: {e:#}");
            None
        }
    });
    let tally = drain(messages, worker_count);
    write_frame(&mut output, &tally)?;
    Ok(tally)
}

/// Entry point of `dirmirage receiver`. An interrupt only marks the process; it keeps draining
/// until the coordinator sends `Cancel`, all sentinels arrive, or its input closes.
pub fn receiver_process_main(worker_count: usize) -> Result<()> {
    let interrupted = CancelToken::new();
    interrupted
        .install_ctrlc_flag()
        .context("set Ctrl+C handler")?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let tally = receive(stdin.lock(), stdout.lock(), worker_count)?;
    debug!(
        "receiver: {} succeeded, {} failed, {} of {} workers finished{}",
        tally.summary.succeeded,
        tally.summary.failed,
        tally.finished_workers,
        worker_count,
        if interrupted.is_cancelled() {
            " (interrupted)"
        } else {
            ""
        }
    );
    Ok(())
}

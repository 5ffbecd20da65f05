//! Worker process: read task frames from stdin, write placeholders, report on stdout.

use anyhow::{Context, Result};
use log::Level;
use std::io::{BufRead, Write};
use std::path::Path;

use super::cancel::CancelToken;
use super::protocol::{TaskFrame, WorkerFrame, read_frames, write_frame};
use crate::placeholder::materialize;
use crate::{LogRecord, ResultEvent, WorkerId};

/// Counts reported in the worker's final log record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Why the worker loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// Received its `Stop` sentinel.
    Stopped,
    /// Input closed without a sentinel (coordinator shutting down).
    InputClosed,
    /// Interrupted between tasks.
    Interrupted,
}

struct FrameOut<W> {
    out: W,
    worker_id: WorkerId,
}

impl<W: Write> FrameOut<W> {
    fn log(&mut self, level: Level, message: impl Into<String>) -> Result<()> {
        let record = LogRecord::new(level, Some(self.worker_id), message);
        write_frame(&mut self.out, &WorkerFrame::Log(record))
    }

    fn result(&mut self, event: ResultEvent) -> Result<()> {
        write_frame(&mut self.out, &WorkerFrame::Result(event))
    }

    fn done(&mut self) -> Result<()> {
        write_frame(
            &mut self.out,
            &WorkerFrame::Done {
                worker_id: self.worker_id,
            },
        )
    }
}

/// Worker loop. Every task yields exactly one `Result` frame plus log frames; the last frame is
/// always `Done`, whether the loop ended on `Stop`, end of input, or an interrupt. A write that
/// is in progress when `interrupted` is set still completes.
pub fn run_worker<R: BufRead, W: Write>(
    worker_id: WorkerId,
    dest_root: &Path,
    input: R,
    output: W,
    interrupted: &CancelToken,
) -> Result<(WorkerStats, WorkerExit)> {
    let mut out = FrameOut {
        out: output,
        worker_id,
    };
    let mut stats = WorkerStats::default();
    out.log(
        Level::Info,
        format!("worker {} started (pid {})", worker_id, std::process::id()),
    )?;

    let mut exit = WorkerExit::InputClosed;
    for frame in read_frames::<_, TaskFrame>(input) {
        let task = match frame {
            Ok(TaskFrame::Task(task)) => task,
            Ok(TaskFrame::Stop) => {
                exit = WorkerExit::Stopped;
                break;
            }
            Err(e) => {
                out.log(Level::Error, format!("skipping task frame: {e:#}"))?;
                continue;
            }
        };

        let rel = task.relative_path.clone();
        match materialize(&task, dest_root) {
            Ok(()) => {
                stats.succeeded += 1;
                out.log(Level::Info, format!("created {}", rel.display()))?;
                out.result(ResultEvent::success(rel, worker_id))?;
            }
            Err(e) => {
                stats.failed += 1;
                let detail = format!("{e:#}");
                out.log(
                    Level::Warn,
                    format!("failed {}: {}", rel.display(), detail),
                )?;
                out.result(ResultEvent::failure(rel, worker_id, detail))?;
            }
        }

        if interrupted.is_cancelled() {
            exit = WorkerExit::Interrupted;
            break;
        }
    }

    out.log(
        Level::Info,
        format!(
            "worker {} finished ({:?}): {} created, {} failed",
            worker_id, exit, stats.succeeded, stats.failed
        ),
    )?;
    out.done()?;
    Ok((stats, exit))
}

/// Entry point of `dirmirage worker`: stdin/stdout are the worker's ends of the queues.
pub fn worker_process_main(worker_id: WorkerId, dest_root: &Path) -> Result<()> {
    let interrupted = CancelToken::new();
    interrupted
        .install_ctrlc_flag()
        .context("set Ctrl+C handler")?;
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_worker(
        worker_id,
        dest_root,
        stdin.lock(),
        stdout.lock(),
        &interrupted,
    )?;
    Ok(())
}

//! Frames exchanged between the coordinator and its child processes.
//!
//! Every channel that crosses a process boundary is a pipe carrying one JSON document per line.
//! The same [`ResultMessage`] type is used on the in-process result queue, so the process-mode
//! receiver sees exactly what the thread-mode receiver sees.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::marker::PhantomData;

use crate::{LogRecord, ResultEvent, Task, WorkerId};

/// Coordinator → worker (stdin). `Stop` is the task-queue sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskFrame {
    Task(Task),
    Stop,
}

/// Worker → coordinator (stdout). `Done` acknowledges the worker's sentinel and is its last frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Result(ResultEvent),
    Log(LogRecord),
    Done { worker_id: WorkerId },
}

/// Items on the result queue, and coordinator → receiver process (stdin).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultMessage {
    Event(ResultEvent),
    /// One per worker; the receiver is complete after `worker_count` of these.
    WorkerDone { worker_id: WorkerId },
    /// Injected by the coordinator on cancellation so the receiver stops waiting.
    Cancel,
}

/// Encode `frame` as one newline-terminated line.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame).context("encode frame")?;
    line.push(b'\n');
    Ok(line)
}

/// Write an encoded line and flush, so the reader sees it immediately.
pub fn write_line<W: Write>(writer: &mut W, line: &[u8]) -> Result<()> {
    writer.write_all(line).context("write frame")?;
    writer.flush().context("flush frame")?;
    Ok(())
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> Result<()> {
    write_line(writer, &encode_frame(frame)?)
}

/// Iterator over frames read line by line. Blank lines are skipped; an undecodable line yields
/// `Some(Err)` and reading continues; an I/O error yields `Some(Err)` once and ends the stream.
pub struct FrameReader<R, T> {
    reader: R,
    line: String,
    finished: bool,
    _frame: PhantomData<T>,
}

pub fn read_frames<R: BufRead, T: DeserializeOwned>(reader: R) -> FrameReader<R, T> {
    FrameReader {
        reader,
        line: String::new(),
        finished: false,
        _frame: PhantomData,
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for FrameReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    let trimmed = self.line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(
                        serde_json::from_str(trimmed)
                            .with_context(|| format!("decode frame {trimmed:?}")),
                    );
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e).context("read frame"));
                }
            }
        }
        None
    }
}

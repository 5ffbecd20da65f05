//! The three pipeline channels.

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use super::protocol::{ResultMessage, TaskFrame};
use crate::LogRecord;

/// Task queue (bounded), result queue and log queue (unbounded).
///
/// The result and log queues are unbounded so a producer never blocks on them, whatever the
/// receiver is doing; only the task queue applies backpressure, and its only producer is the
/// coordinator, which polls the cancel flag while it waits.
pub struct Queues {
    pub task_tx: Sender<TaskFrame>,
    pub task_rx: Receiver<TaskFrame>,
    pub result_tx: Sender<ResultMessage>,
    pub result_rx: Receiver<ResultMessage>,
    pub log_tx: Sender<LogRecord>,
    pub log_rx: Receiver<LogRecord>,
}

pub fn create_queues(task_cap: usize) -> Queues {
    let (task_tx, task_rx) = bounded::<TaskFrame>(task_cap.max(1));
    let (result_tx, result_rx) = unbounded::<ResultMessage>();
    let (log_tx, log_rx) = unbounded::<LogRecord>();
    Queues {
        task_tx,
        task_rx,
        result_tx,
        result_rx,
        log_tx,
        log_rx,
    }
}

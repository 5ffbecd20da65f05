//! Log aggregation: many producers hold a [`LogHandle`] (or write `Log` frames to their stdout),
//! exactly one entity owns the [`LogSink`].

use crossbeam_channel::{Receiver, Sender};
use log::Level;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::utils::config::PackagePaths;
use crate::{LogRecord, WorkerId};

/// Final destination of aggregated records. Only ever called from one thread at a time.
pub trait LogSink: Send {
    fn emit(&mut self, record: &LogRecord);

    fn flush(&mut self) {}
}

/// Re-emit records through the `log` facade (whatever logger the process installed).
#[derive(Clone, Copy, Debug, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn emit(&mut self, record: &LogRecord) {
        log::log!(
            target: PackagePaths::get().worker_log_target(),
            record.level,
            "[{} {}] {}",
            record.origin(),
            record.timestamp.format("%H:%M:%S%.3f"),
            record.message
        );
    }

    fn flush(&mut self) {
        log::logger().flush();
    }
}

/// Keeps every record in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct CaptureSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LogSink for CaptureSink {
    fn emit(&mut self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Write-handle onto the log queue for producers inside the coordinator process.
#[derive(Clone)]
pub struct LogHandle {
    tx: Sender<LogRecord>,
    worker_id: Option<WorkerId>,
}

impl LogHandle {
    pub fn coordinator(tx: Sender<LogRecord>) -> Self {
        Self { tx, worker_id: None }
    }

    pub fn for_worker(tx: Sender<LogRecord>, worker_id: WorkerId) -> Self {
        Self {
            tx,
            worker_id: Some(worker_id),
        }
    }

    /// Queue a record. A closed queue means the aggregator is gone; the record is dropped.
    pub fn log(&self, level: Level, message: impl Into<String>) {
        let _ = self.tx.send(LogRecord::new(level, self.worker_id, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }
}

/// Emit every record from `log_rx` in dequeue order until all producers have dropped their handles.
/// Returns the number of records emitted.
pub fn aggregate(log_rx: &Receiver<LogRecord>, sink: &mut dyn LogSink) -> usize {
    let mut emitted = 0_usize;
    for record in log_rx.iter() {
        sink.emit(&record);
        emitted += 1;
    }
    sink.flush();
    emitted
}

/// Run [`aggregate`] on a dedicated thread.
pub fn spawn_log_aggregator(
    log_rx: Receiver<LogRecord>,
    mut sink: Box<dyn LogSink>,
) -> JoinHandle<usize> {
    thread::spawn(move || aggregate(&log_rx, sink.as_mut()))
}

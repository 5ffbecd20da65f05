//! Receiver accounting shared by the thread and process receivers.

use serde::{Deserialize, Serialize};

use super::protocol::ResultMessage;
use crate::Summary;

/// Where a receiver stands after applying a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainState {
    Draining,
    /// `worker_count` sentinels observed.
    Complete,
    /// Cancel message observed, or the stream ended early.
    Cancelled,
}

/// Running tally of the result queue. Serialized as the receiver process's final report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub summary: Summary,
    pub finished_workers: usize,
    pub cancelled: bool,
}

impl Tally {
    pub fn apply(&mut self, msg: ResultMessage, worker_count: usize) -> DrainState {
        match msg {
            ResultMessage::Event(event) => self.summary.record(event),
            ResultMessage::WorkerDone { .. } => self.finished_workers += 1,
            ResultMessage::Cancel => self.cancelled = true,
        }
        self.state(worker_count)
    }

    pub fn state(&self, worker_count: usize) -> DrainState {
        if self.cancelled {
            DrainState::Cancelled
        } else if self.finished_workers >= worker_count {
            DrainState::Complete
        } else {
            DrainState::Draining
        }
    }
}

/// Drain `messages` until `worker_count` sentinels or a cancel. If the messages run out first the
/// tally is marked cancelled.
pub fn drain<I>(messages: I, worker_count: usize) -> Tally
where
    I: IntoIterator<Item = ResultMessage>,
{
    let mut tally = Tally::default();
    if tally.state(worker_count) != DrainState::Draining {
        return tally;
    }
    for msg in messages {
        if tally.apply(msg, worker_count) != DrainState::Draining {
            return tally;
        }
    }
    tally.cancelled = true;
    tally
}

//! Bounded joins for child processes and threads.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::process::{Child, ExitStatus};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::utils::config::TimeoutConsts;

/// How a component ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinReport {
    Exited(Option<i32>),
    /// Still running at the deadline and killed.
    Killed,
}

/// Wait for `child` until `deadline`; kill it if it has not exited by then.
pub fn wait_or_kill(child: &mut Child, deadline: Instant, label: &str) -> Result<JoinReport> {
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("wait for {label}"))?
        {
            log_status(label, status);
            return Ok(JoinReport::Exited(status.code()));
        }
        if Instant::now() >= deadline {
            warn!("{label} did not exit in time; killing pid {}", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(JoinReport::Killed);
        }
        std::thread::sleep(TimeoutConsts::POLL_INTERVAL);
    }
}

fn log_status(label: &str, status: ExitStatus) {
    if status.success() {
        debug!("{label} exited");
    } else {
        warn!("{label} exited with {status}");
    }
}

/// Join `handle` if it finishes before `deadline`. A thread still running at the deadline is
/// detached and `None` is returned.
pub fn join_until<T>(handle: JoinHandle<T>, deadline: Instant, label: &str) -> Option<T> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{label} thread still running at shutdown deadline; detaching");
            return None;
        }
        std::thread::sleep(TimeoutConsts::POLL_INTERVAL);
    }
    match handle.join() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{label} thread panicked");
            None
        }
    }
}

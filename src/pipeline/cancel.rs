use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Token for cooperative cancellation of a run.
///
/// Set from a Ctrl+C handler or by a library caller; every blocking operation in the pipeline
/// wakes up periodically to check it. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Install a Ctrl+C handler that sets this token. A second Ctrl+C exits immediately with `exit_code`.
    pub fn install_ctrlc(&self, exit_code: i32) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                std::process::exit(exit_code);
            }
            token.cancel();
        })
    }

    /// Install a Ctrl+C handler that only marks this token (child processes: keep draining, let
    /// the coordinator drive shutdown).
    pub fn install_ctrlc_flag(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel())
    }
}

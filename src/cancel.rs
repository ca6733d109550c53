//! Run cancellation
//!
//! The whole run is cancelable as a unit. The token is checked between
//! pipeline stages and immediately before the release-marker write, so an
//! interrupted run can abandon in-flight uploads but never leaves a marker
//! pointing at an incomplete release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, set from the SIGINT handler
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Install a Ctrl-C handler that trips this token
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("interrupt received, finishing current stage then aborting");
            token.cancel();
        })
    }
}

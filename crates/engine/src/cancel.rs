//! Session-scoped cancellation, copied near verbatim from the teacher's
//! `CancelToken` (an `AtomicBool` flag checked cooperatively by the loop)
//! rather than switching to `tokio_util::sync::CancellationToken` — one
//! primitive is enough for a single flat flag with no group fan-out here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

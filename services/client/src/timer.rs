//! One-shot timers owned by the value that scheduled them.

use std::time::Duration;
use tokio::task::JoinHandle;

/// A delayed callback that is aborted when cancelled or dropped.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct ScopedTimer {
    handle: JoinHandle<()>,
}

impl ScopedTimer {
    pub fn schedule<F>(delay: Duration, fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        Self { handle }
    }

    /// Whether the callback has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

//! Whether the media leg of the current session is connected.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Answers whether the media leg of the current session is connected.
///
/// The text channel consults this before every reconnect.
#[cfg_attr(test, mockall::automock)]
pub trait MediaLiveness: Send + Sync {
    fn is_media_active(&self) -> bool;
}

/// Shared flag flipped by the media session's event pump.
#[derive(Debug, Clone, Default)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }
}

impl MediaLiveness for LivenessFlag {
    fn is_media_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

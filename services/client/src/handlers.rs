//! Multi-subscriber callback registries used by the transports.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
};

// Process-wide so ids from different registries never collide.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct HandlerRegistry<T: ?Sized> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
}

impl<T: ?Sized> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl<T: ?Sized> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every handler in subscription order. The lock is not held while
    /// handlers run, so a handler may subscribe or unsubscribe.
    pub fn dispatch(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in snapshot {
            handler(value);
        }
    }
}

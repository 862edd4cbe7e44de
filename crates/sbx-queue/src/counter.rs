use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared lock-free counter for progress accounting across workers.
#[derive(Debug, Clone, Default)]
pub struct AtomicCounter {
    inner: Arc<AtomicI64>,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` and return the updated value.
    pub fn add(&self, delta: i64) -> i64 {
        self.inner.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn value(&self) -> i64 {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.store(0, Ordering::SeqCst);
    }
}

//! Apply progress indicator

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ProgressInner {
    total: AtomicUsize,
    current: AtomicUsize,
    done: AtomicBool,
    success: AtomicBool,
}

/// Shared progress counter for an apply invocation.
///
/// Cheap to clone; readable concurrently while actions execute.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: usize) {
        self.inner.total.store(total, Ordering::SeqCst);
    }

    pub fn advance(&self) {
        self.inner.current.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self, success: bool) {
        self.inner.success.store(success, Ordering::SeqCst);
        self.inner.done.store(true, Ordering::SeqCst);
    }

    /// `(completed, total)` snapshot.
    pub fn snapshot(&self) -> (usize, usize) {
        (
            self.inner.current.load(Ordering::SeqCst),
            self.inner.total.load(Ordering::SeqCst),
        )
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    pub fn is_success(&self) -> bool {
        self.inner.success.load(Ordering::SeqCst)
    }
}

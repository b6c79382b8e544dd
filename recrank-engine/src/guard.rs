//! Single-flight training guard
//!
//! At most one training run executes at a time. Acquisition is a single
//! atomic test-and-set and never blocks: a caller that loses simply skips
//! its cycle, and the next scheduled tick tries again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exclusive, non-blocking "training in progress" flag
#[derive(Debug, Default)]
pub struct TrainingGuard {
    active: AtomicBool,
}

impl TrainingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take ownership of the training slot
    ///
    /// Returns `None` immediately if a run is already active. The returned
    /// permit releases the slot when dropped, on every exit path including
    /// errors and panics in the guarded body.
    pub fn try_begin(self: &Arc<Self>) -> Option<TrainingPermit> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| TrainingPermit {
                guard: Arc::clone(self),
            })
    }

    /// Whether a training run currently holds the slot
    pub fn is_training(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Proof of ownership of the training slot
#[must_use = "dropping the permit immediately ends the training run"]
#[derive(Debug)]
pub struct TrainingPermit {
    guard: Arc<TrainingGuard>,
}

impl TrainingPermit {
    /// End the training run explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TrainingPermit {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

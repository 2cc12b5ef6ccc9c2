use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

use crate::error::PoolError;

/// Result of a submitted callable.
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: Receiver<T>) -> Self {
        Self { rx }
    }

    /// Block until the task finished.
    ///
    /// [`PoolError::TaskFailed`] if the task panicked or was dropped unrun.
    pub fn join(self) -> Result<T, PoolError> {
        self.rx.recv().map_err(|_| PoolError::TaskFailed)
    }
}

/// Cancels a delayed or periodic task.
#[derive(Debug, Clone, Default)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Runs already dispatched to a worker still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

//! Background task ownership.

use tokio::task::JoinHandle;

/// Guard that aborts a spawned task when dropped.
///
/// Owners of reader loops and timers hold one so the task can never outlive
/// the resource it serves.
///
/// ```rust
/// # tokio_test::block_on(async {
/// use tether_transport_traits::TaskGuard;
///
/// let guard = TaskGuard::new(tokio::spawn(std::future::pending::<()>()));
/// assert!(!guard.is_finished());
/// drop(guard);
/// # });
/// ```
#[derive(Debug)]
pub struct TaskGuard {
    handle: Option<JoinHandle<()>>,
}

impl TaskGuard {
    /// Take ownership of a spawned task
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Abort the task now. Idempotent.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the task without aborting it.
    pub fn detach(mut self) {
        self.handle = None;
    }

    /// Returns `true` once the task has completed or was aborted
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

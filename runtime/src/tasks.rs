//! Owned background tasks.

use std::future::Future;
use tokio::task::JoinHandle;

/// A spawned task that is aborted when cancelled or dropped.
///
/// Timers, connection attempts and socket pumps are all `ScopedTask`s, so
/// replacing or clearing the slot that holds one is enough to guarantee it
/// never fires again.
#[derive(Debug)]
pub struct ScopedTask {
    handle: JoinHandle<()>,
}

impl ScopedTask {
    /// Spawn `future` on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Abort the task. Idempotent.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// `true` once the task has completed or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Counts outstanding background work and lets callers wait for it to drain.
///
/// Used at shutdown and in tests to observe dispatch completion without
/// polling.
#[derive(Debug, Default)]
pub struct TaskTracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide tracker.
    pub fn global() -> Arc<TaskTracker> {
        static GLOBAL: OnceLock<Arc<TaskTracker>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TaskTracker::new())).clone()
    }

    /// Number of tracked units still running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Register one unit now and run `future` on the current runtime.
    ///
    /// The unit is released when the future finishes, panics or is dropped.
    ///
    /// # Panics
    /// Panics outside a Tokio runtime, like `tokio::spawn`.
    pub fn track<F>(self: &Arc<Self>, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.enter();
        tokio::spawn(async move {
            let _guard = guard;
            future.await;
        })
    }

    /// Register one unit, released when the guard drops.
    pub fn enter(self: &Arc<Self>) -> TrackerGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        TrackerGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Resolve once no unit is outstanding. Immediate when already idle.
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// One outstanding unit of a [`TaskTracker`].
#[derive(Debug)]
pub struct TrackerGuard {
    tracker: Arc<TaskTracker>,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

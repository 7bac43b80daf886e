//! Handle for the scheduler's long-running background tasks.

use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::{task::JoinHandle, sync::Notify};

/// Owns one background task and the two signals it listens to: a running
/// flag and a wake-up [`Notify`].
///
/// The accumulator and the reaper both run under one of these. Shutting the
/// handle down clears the flag and wakes the task so it can observe the flag
/// and exit; dropping the handle does the same without waiting.
///
/// ```ignore
/// let mut worker = BatchWorkerHandle::new(|running, wake| {
///     tokio::spawn(async move {
///         while running.load(Ordering::SeqCst) {
///             wake.notified().await;
///         }
///     })
/// });
///
/// worker.shutdown();
/// worker.join().await;
/// ```
pub struct BatchWorkerHandle {
    running: Arc<AtomicBool>,

    /// `None` once the task has been joined or detached
    handle: Option<JoinHandle<()>>,

    notifier: Arc<Notify>,
}

impl BatchWorkerHandle {
    /// Spawns the task through `task`, which receives the running flag and
    /// wake-up notifier and must return the spawned task's handle.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());

        Self {
            running,
            handle: Some(handle),
            notifier,
        }
    }

    /// Wakes the task once.
    pub fn notify(&self) {
        self.notifier.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the task to stop. Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();
    }

    /// Waits for the task to exit. Returns immediately if already joined.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BatchWorkerHandle {
    /// Signals the task to stop; the task itself is left to finish detached.
    fn drop(&mut self) {
        self.shutdown();
    }
}

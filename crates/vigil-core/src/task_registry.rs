//! Shared task registry for background work.
//!
//! Owns the join handles of long-running service tasks (pruning, reload
//! triggers) so they stop together on shutdown or when the registry is dropped.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tracks spawned tasks and signals them to stop
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task that runs to completion unless the registry shuts down.
    pub fn spawn_cancellable<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => debug!("background task cancelled"),
                _ = fut => {}
            }
        });
        self.handles.lock().push(handle);
    }

    /// Run `f` every `interval` until it returns `false` or shutdown is signalled.
    ///
    /// With `run_immediately` the first invocation happens right away, otherwise
    /// after one full interval.
    pub fn spawn_interval_until<F, Fut>(&self, interval: Duration, run_immediately: bool, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut first = run_immediately;
            loop {
                if !first {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                first = false;

                if *shutdown_rx.borrow() {
                    break;
                }
                if !f().await {
                    debug!("interval task finished");
                    break;
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Signal shutdown and abort every tracked task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.lock();
        debug!(tasks = handles.len(), "stopping background tasks");
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

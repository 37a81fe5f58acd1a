//! Shutdown coordination for supervised background tasks.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks subscribe to,
/// and keeps their join handles so the owner can wait for them to finish.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    /// Tasks spawned through this coordinator.
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Spawn a task that receives its own shutdown subscription.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.subscribe()));
        self.tasks
            .lock()
            .expect("shutdown task list poisoned")
            .push((name, handle));
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Trigger the signal and wait for every spawned task to return.
    pub async fn trigger_and_join(&self) {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("shutdown task list poisoned"));
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task did not exit cleanly");
            } else {
                tracing::debug!(task = name, "Background task stopped");
            }
        }
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

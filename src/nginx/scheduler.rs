//! Coalescing of queued updates.
//!
//! Callers drop snapshots into a single pending slot; only the newest one
//! survives. A ticker drains the slot once per update period, so bursts
//! inside one period cost a single application. Applies made outside the
//! ticker are recorded with `mark_applied` and hold the next tick back.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

/// Single-slot mailbox where a newer value replaces an older one.
pub struct PendingSlot<T> {
    pending: Mutex<Option<T>>,
    last_applied: Mutex<Option<Instant>>,
}

impl<T> PendingSlot<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            last_applied: Mutex::new(None),
        }
    }

    /// Queue `value`, discarding whatever was queued before.
    pub fn offer(&self, value: T) {
        let replaced = self
            .pending
            .lock()
            .expect("pending update slot poisoned")
            .replace(value)
            .is_some();
        if replaced {
            tracing::debug!("Superseded a queued update");
        }
    }

    pub fn take(&self) -> Option<T> {
        self.pending.lock().expect("pending update slot poisoned").take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().expect("pending update slot poisoned").is_some()
    }

    /// Record that an apply just reached the underlying process.
    pub fn mark_applied(&self) {
        *self.last_applied.lock().expect("pending update slot poisoned") = Some(Instant::now());
    }

    /// When the last apply was less than `period` ago, the instant the next one is allowed.
    pub fn cooldown_until(&self, period: Duration) -> Option<Instant> {
        let last = (*self.last_applied.lock().expect("pending update slot poisoned"))?;
        let allowed = last + period;
        (allowed > Instant::now()).then_some(allowed)
    }
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the queued value, if any, once per `period` until shutdown.
///
/// A tick that lands within `period` of the last marked apply is pushed back
/// until the period has elapsed.
pub async fn run<T, F, Fut>(
    slot: Arc<PendingSlot<T>>,
    period: Duration,
    apply: F,
    mut shutdown: broadcast::Receiver<()>,
) where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(allowed) = slot.cooldown_until(period) {
                    ticker.reset_at(allowed);
                    continue;
                }
                if let Some(value) = slot.take() {
                    apply(value).await;
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Update scheduler stopping");
}

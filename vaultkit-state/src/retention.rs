//! Subscriber retention for shared state streams.
//!
//! Each shared stream (state core reader, derived-state runner) keeps one
//! background task alive while it has subscribers. When the last
//! subscriber detaches the task survives for a grace period, so a quick
//! resubscribe reuses the retained value instead of re-reading the
//! backend. Only when the grace period elapses with zero subscribers is
//! the task torn down.
//!
//! State machine per stream:
//! `Unsubscribed -> Active -> DrainGrace -> Unsubscribed`, with
//! `DrainGrace -> Active` on resubscribe.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tracks subscriber count and owns the shared background task.
pub(crate) struct Retention {
    delay: Duration,
    slot: Mutex<RetentionSlot>,
}

struct RetentionSlot {
    subscribers: usize,
    /// Bumped whenever the count drops to zero; invalidates stale grace
    /// timers from earlier drain cycles.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Retention {
    pub(crate) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            slot: Mutex::new(RetentionSlot {
                subscribers: 0,
                generation: 0,
                task: None,
            }),
        })
    }

    /// Registers a subscriber, starting the shared task if none is running.
    pub(crate) fn attach(&self, start: impl FnOnce() -> JoinHandle<()>) {
        let mut slot = self.slot.lock().expect("retention mutex poisoned");
        slot.subscribers += 1;
        if slot.task.is_none() {
            slot.task = Some(start());
        }
    }

    /// Deregisters a subscriber.
    ///
    /// When the count reaches zero a grace timer is armed; if it fires
    /// with the count still zero, the shared task is aborted and
    /// `on_teardown` runs (under the slot lock) to reset the stream.
    pub(crate) fn detach(
        self: &Arc<Self>,
        on_teardown: impl FnOnce() + Send + 'static,
    ) {
        let generation = {
            let mut slot = self.slot.lock().expect("retention mutex poisoned");
            slot.subscribers = slot.subscribers.saturating_sub(1);
            if slot.subscribers > 0 {
                return;
            }
            slot.generation += 1;
            slot.generation
        };

        let retention = Arc::clone(self);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(retention.delay).await;
                    retention.teardown_if_idle(generation, on_teardown);
                });
            }
            // No runtime to host the grace timer; tear down immediately.
            Err(_) => self.teardown_if_idle(generation, on_teardown),
        }
    }

    fn teardown_if_idle(&self, generation: u64, on_teardown: impl FnOnce()) {
        let mut slot = self.slot.lock().expect("retention mutex poisoned");
        if slot.subscribers > 0 || slot.generation != generation {
            return;
        }
        if let Some(task) = slot.task.take() {
            task.abort();
            debug!("shared stream torn down after drain grace");
        }
        on_teardown();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.slot.lock().expect("retention mutex poisoned").subscribers
    }
}

impl Drop for Retention {
    fn drop(&mut self) {
        if let Some(task) = self
            .slot
            .lock()
            .expect("retention mutex poisoned")
            .task
            .take()
        {
            task.abort();
        }
    }
}

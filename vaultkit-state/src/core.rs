//! The state core primitive.
//!
//! A [`StateCore`] binds one storage key to one backend and provides the
//! two halves of the store's contract:
//!
//! - a multicast, replay-one stream of the slot's value, shared by all
//!   subscribers and fed by one reader task, and
//! - a serialized `update` path whose read-compute-write cycles are
//!   totally ordered per key.
//!
//! The reader task subscribes to backend change notifications before its
//! initial read, so a write landing between the two is never lost. Every
//! later change for this exact key is re-emitted from the notification
//! payload without touching the backend again; only a lagged notification
//! stream forces a recovery read.
//!
//! The provider guarantees at most one core per storage key per process,
//! which is what makes the per-core write lock a total order.

use crate::definitions::{DebugFlags, StateValue};
use crate::error::{StateError, StateResult};
use crate::retention::Retention;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};
use vaultkit_storage::StorageBackend;

/// Default deadline for the optional dependency stream in `update_with`.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_millis(1000);

/// What the shared stream currently knows about the slot.
pub(crate) enum Load<T> {
    /// No backend read has completed since the stream (re)started.
    Pending,
    /// The last committed value, or the error that produced it.
    Ready(Result<Option<T>, Arc<StateError>>),
}

/// Options for [`update_with`](StateCore::apply_update) calls.
pub struct UpdateOptions<T, D> {
    /// A dependency stream whose first emission is handed to the update
    /// function. Must emit within `timeout` or the update fails with no
    /// write.
    pub combine_with: Option<BoxStream<'static, D>>,
    /// Predicate deciding whether to write at all. Returning `false`
    /// resolves the call to the unmodified current value with zero writes.
    pub should_update: Option<Box<dyn FnOnce(Option<&T>, Option<&D>) -> bool + Send>>,
    /// Deadline for `combine_with`.
    pub timeout: Duration,
}

impl<T, D> Default for UpdateOptions<T, D> {
    fn default() -> Self {
        Self {
            combine_with: None,
            should_update: None,
            timeout: DEFAULT_UPDATE_TIMEOUT,
        }
    }
}

impl<T, D> UpdateOptions<T, D> {
    /// Sets the dependency stream.
    #[must_use]
    pub fn combine_with(mut self, stream: BoxStream<'static, D>) -> Self {
        self.combine_with = Some(stream);
        self
    }

    /// Sets the write predicate.
    #[must_use]
    pub fn should_update(
        mut self,
        predicate: impl FnOnce(Option<&T>, Option<&D>) -> bool + Send + 'static,
    ) -> Self {
        self.should_update = Some(Box::new(predicate));
        self
    }

    /// Sets the dependency deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one update cycle, including what the transition looked like.
pub(crate) struct UpdateOutcome<T> {
    /// The value the call resolves to.
    pub value: Option<T>,
    /// Whether a write was issued.
    pub written: bool,
    /// Whether the authoritative pre-update value was null.
    pub previous_was_none: bool,
}

/// One storage key bound to one backend, with a shared reader and a
/// serialized writer.
pub(crate) struct StateCore<T: StateValue> {
    key: String,
    storage: Arc<dyn StorageBackend>,
    tx: watch::Sender<Load<T>>,
    retention: Arc<Retention>,
    write_lock: Mutex<()>,
    debug: DebugFlags,
    /// Saves issued by this core's update path whose backend notification
    /// has not been consumed by the reader yet. The writer publishes its
    /// commit directly, so the reader must swallow the echo instead of
    /// re-publishing it out of order.
    own_writes: Arc<AtomicUsize>,
}

impl<T: StateValue> StateCore<T> {
    pub(crate) fn new(
        key: String,
        storage: Arc<dyn StorageBackend>,
        cleanup_delay: Duration,
        debug: DebugFlags,
    ) -> Arc<Self> {
        let (tx, _) = watch::channel(Load::Pending);
        Arc::new(Self {
            key,
            storage,
            tx,
            retention: Retention::new(cleanup_delay),
            write_lock: Mutex::new(()),
            debug,
            own_writes: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Attaches a new subscriber to the shared stream.
    pub(crate) fn subscribe(self: &Arc<Self>) -> StateSubscription<T> {
        let rx = self.tx.subscribe();
        self.retention.attach(|| {
            let key = self.key.clone();
            let storage = Arc::clone(&self.storage);
            let tx = self.tx.clone();
            let own_writes = Arc::clone(&self.own_writes);
            let debug = self.debug;
            tokio::spawn(read_loop(key, storage, tx, own_writes, debug))
        });
        StateSubscription {
            rx,
            core: Arc::clone(self),
            started: false,
        }
    }

    /// Reads the authoritative current value straight from the backend.
    pub(crate) async fn read(&self) -> StateResult<Option<T>> {
        let raw = self.storage.get(&self.key).await?;
        if self.debug.log_retrievals {
            info!(key = %self.key, null = raw.is_none(), "retrieved state from storage");
        }
        decode::<T>(&self.key, raw)
    }

    /// Runs one full read-compute-write cycle under the per-key write lock.
    pub(crate) async fn apply_update<D, F>(
        &self,
        f: F,
        options: UpdateOptions<T, D>,
    ) -> StateResult<UpdateOutcome<T>>
    where
        D: Send + 'static,
        F: FnOnce(Option<T>, Option<&D>) -> Option<T> + Send,
    {
        let _guard = self.write_lock.lock().await;

        let current = self.read().await?;

        let deps: Option<D> = match options.combine_with {
            Some(mut stream) => {
                let value = tokio::time::timeout(options.timeout, stream.next())
                    .await
                    .map_err(|_| StateError::DependencyTimeout(options.timeout))?
                    .ok_or(StateError::DependencyTimeout(options.timeout))?;
                Some(value)
            }
            None => None,
        };

        if let Some(predicate) = options.should_update {
            if !predicate(current.as_ref(), deps.as_ref()) {
                return Ok(UpdateOutcome {
                    previous_was_none: current.is_none(),
                    value: current,
                    written: false,
                });
            }
        }

        let previous_was_none = current.is_none();
        let new_value = f(current, deps.as_ref());
        let raw = match &new_value {
            Some(v) => Some(serde_json::to_value(v).map_err(|e| StateError::Serialize {
                key: self.key.clone(),
                source: e,
            })?),
            None => None,
        };
        self.own_writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.storage.save(&self.key, raw).await {
            self.own_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(e.into());
        }
        // Publish the commit while still holding the write lock, so the
        // stream reflects it by the time this call resolves. The reader
        // skips the matching notification echo.
        self.tx.send_replace(Load::Ready(Ok(new_value.clone())));
        debug!(key = %self.key, cleared = new_value.is_none(), "state updated");
        if self.debug.log_updates {
            info!(key = %self.key, cleared = new_value.is_none(), "updated state in storage");
        }

        Ok(UpdateOutcome {
            value: new_value,
            written: true,
            previous_was_none,
        })
    }

    fn detach_subscriber(self: &Arc<Self>) {
        let tx = self.tx.clone();
        self.retention.detach(move || {
            tx.send_replace(Load::Pending);
        });
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.retention.subscriber_count()
    }
}

/// Shared reader: one initial backend read, then change-notification
/// driven re-emits for this key only.
async fn read_loop<T: StateValue>(
    key: String,
    storage: Arc<dyn StorageBackend>,
    tx: watch::Sender<Load<T>>,
    own_writes: Arc<AtomicUsize>,
    debug: DebugFlags,
) {
    // Subscribe before the initial read so no concurrent save is missed.
    let mut updates = storage.updates();

    // Anything already queued is folded into the read below; re-publishing
    // it afterwards would set the stream back to an older value. Writes
    // from reader-less periods never echo here either, so their marks are
    // stale too.
    while updates.try_recv().is_ok() {}
    own_writes.store(0, Ordering::SeqCst);

    let initial = match storage.get(&key).await {
        Ok(raw) => {
            if debug.log_retrievals {
                info!(key = %key, null = raw.is_none(), "retrieved state from storage");
            }
            decode::<T>(&key, raw).map_err(StateError::shared)
        }
        Err(e) => Err(StateError::from(e).shared()),
    };
    debug!(key = %key, "state stream primed from backend");
    tx.send_replace(Load::Ready(initial));

    loop {
        match updates.recv().await {
            Ok(update) if update.key == key => {
                // Saves made through this core's update path were already
                // published by the writer, in commit order.
                if own_writes
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    continue;
                }
                let decoded = decode::<T>(&key, update.value).map_err(StateError::shared);
                tx.send_replace(Load::Ready(decoded));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(key = %key, skipped, "storage notifications lagged; re-reading");
                // Echoes may have been among the skipped notifications.
                own_writes.store(0, Ordering::SeqCst);
                let recovered = match storage.get(&key).await {
                    Ok(raw) => decode::<T>(&key, raw).map_err(StateError::shared),
                    Err(e) => Err(StateError::from(e).shared()),
                };
                tx.send_replace(Load::Ready(recovered));
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn decode<T: StateValue>(key: &str, raw: Option<serde_json::Value>) -> StateResult<Option<T>> {
    match raw {
        None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StateError::Deserialize {
                key: key.to_string(),
                source: e,
            }),
    }
}

/// One subscriber's handle onto a shared state stream.
///
/// The first `next` resolves as soon as the stream has a committed value,
/// replaying the latest one; each later `next` resolves on the next
/// commit. Dropping the subscription starts the drain-grace countdown
/// once it was the last one.
pub struct StateSubscription<T: StateValue> {
    rx: watch::Receiver<Load<T>>,
    core: Arc<StateCore<T>>,
    started: bool,
}

impl<T: StateValue> StateSubscription<T> {
    /// Waits for the next value: the replayed current value first, then
    /// one value per commit.
    pub async fn next(&mut self) -> StateResult<Option<T>> {
        loop {
            if self.started {
                self.rx
                    .changed()
                    .await
                    .map_err(|_| StateError::SubscriptionClosed)?;
            } else {
                self.rx
                    .wait_for(|load| matches!(load, Load::Ready(_)))
                    .await
                    .map_err(|_| StateError::SubscriptionClosed)?;
                self.started = true;
            }

            let current = {
                let load = self.rx.borrow_and_update();
                match &*load {
                    Load::Pending => None,
                    Load::Ready(Ok(value)) => Some(Ok(value.clone())),
                    Load::Ready(Err(e)) => Some(Err(StateError::Shared(Arc::clone(e)))),
                }
            };
            if let Some(result) = current {
                return result;
            }
        }
    }
}

impl<T: StateValue> Drop for StateSubscription<T> {
    fn drop(&mut self) {
        self.core.detach_subscriber();
    }
}

//! Derived state.
//!
//! A derived state is a memoized pure view over another state's stream:
//! one runner task consumes parent emissions, applies the transform once
//! per emission, and fans the result out through a replay-one channel, so
//! the transform never runs more than once per emission no matter how
//! many subscribers are attached. The provider caches instances per
//! (parent identity, derivation name), and retention mirrors the state
//! core's drain-grace behavior.

use crate::definitions::{StateDefinition, StateValue};
use crate::error::{StateError, StateResult};
use crate::retention::Retention;
use crate::stream::ObservedState;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::definitions::DEFAULT_CLEANUP_DELAY;

/// Bound for values produced by a derivation.
///
/// Derived values live only in the shared channel, never in a backend,
/// so no serde bound is needed.
pub trait DerivedValue: Clone + Send + Sync + 'static {}

impl<T> DerivedValue for T where T: Clone + Send + Sync + 'static {}

/// Identity and transform of one derivation.
pub struct DeriveDefinition<TFrom, TTo> {
    state: StateDefinition,
    name: Arc<str>,
    cleanup_delay: Duration,
    derive: Arc<dyn Fn(Option<TFrom>) -> TTo + Send + Sync>,
}

impl<TFrom, TTo> DeriveDefinition<TFrom, TTo> {
    /// Creates a derive definition.
    ///
    /// # Panics
    ///
    /// Panics when `name` is empty.
    #[must_use]
    pub fn new(
        state: StateDefinition,
        name: &str,
        derive: impl Fn(Option<TFrom>) -> TTo + Send + Sync + 'static,
    ) -> Self {
        assert!(!name.is_empty(), "derive definition name must not be empty");
        Self {
            state,
            name: Arc::from(name),
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            derive: Arc::new(derive),
        }
    }

    /// Overrides the cleanup delay for the derived stream.
    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// The owning state definition.
    #[must_use]
    pub fn state(&self) -> &StateDefinition {
        &self.state
    }

    /// The derivation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cleanup delay.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// Stable cache identity: domain plus derivation name.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.state.name(), self.name)
    }
}

impl<TFrom, TTo> Clone for DeriveDefinition<TFrom, TTo> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            name: Arc::clone(&self.name),
            cleanup_delay: self.cleanup_delay,
            derive: Arc::clone(&self.derive),
        }
    }
}

enum DerivedLoad<TTo> {
    Pending,
    Ready(Result<TTo, Arc<StateError>>),
}

pub(crate) struct DerivedInner<TFrom: StateValue, TTo: DerivedValue> {
    parent: Weak<dyn ObservedState<TFrom>>,
    definition: DeriveDefinition<TFrom, TTo>,
    tx: watch::Sender<DerivedLoad<TTo>>,
    retention: Arc<Retention>,
}

impl<TFrom: StateValue, TTo: DerivedValue> DerivedInner<TFrom, TTo> {
    pub(crate) fn new(
        parent: Weak<dyn ObservedState<TFrom>>,
        definition: DeriveDefinition<TFrom, TTo>,
    ) -> Arc<Self> {
        let (tx, _) = watch::channel(DerivedLoad::Pending);
        let retention = Retention::new(definition.cleanup_delay());
        Arc::new(Self {
            parent,
            definition,
            tx,
            retention,
        })
    }

    fn subscribe(self: &Arc<Self>) -> DerivedSubscription<TFrom, TTo> {
        let rx = self.tx.subscribe();
        self.retention.attach(|| {
            let parent = Weak::clone(&self.parent);
            let derive = Arc::clone(&self.definition.derive);
            let tx = self.tx.clone();
            tokio::spawn(run_loop(parent, derive, tx))
        });
        DerivedSubscription {
            rx,
            inner: Arc::clone(self),
            started: false,
        }
    }

    fn detach_subscriber(self: &Arc<Self>) {
        let tx = self.tx.clone();
        self.retention.detach(move || {
            tx.send_replace(DerivedLoad::Pending);
        });
    }
}

/// Runner: one parent subscription, one transform invocation per emission.
async fn run_loop<TFrom: StateValue, TTo: DerivedValue>(
    parent: Weak<dyn ObservedState<TFrom>>,
    derive: Arc<dyn Fn(Option<TFrom>) -> TTo + Send + Sync>,
    tx: watch::Sender<DerivedLoad<TTo>>,
) {
    let Some(parent) = parent.upgrade() else {
        tx.send_replace(DerivedLoad::Ready(Err(Arc::new(
            StateError::SubscriptionClosed,
        ))));
        return;
    };
    let mut stream = parent.observe();
    drop(parent);

    loop {
        match stream.next().await {
            Ok(value) => {
                let derived = derive(value);
                tx.send_replace(DerivedLoad::Ready(Ok(derived)));
            }
            Err(StateError::SubscriptionClosed) => {
                tx.send_replace(DerivedLoad::Ready(Err(Arc::new(
                    StateError::SubscriptionClosed,
                ))));
                break;
            }
            Err(e) => {
                tx.send_replace(DerivedLoad::Ready(Err(e.shared())));
            }
        }
    }
}

/// A memoized pure view computed from another state's stream.
pub struct DerivedState<TFrom: StateValue, TTo: DerivedValue> {
    inner: Arc<DerivedInner<TFrom, TTo>>,
}

impl<TFrom: StateValue, TTo: DerivedValue> DerivedState<TFrom, TTo> {
    pub(crate) fn from_inner(inner: Arc<DerivedInner<TFrom, TTo>>) -> Self {
        Self { inner }
    }

    /// The derive definition this state was built from.
    #[must_use]
    pub fn definition(&self) -> &DeriveDefinition<TFrom, TTo> {
        &self.inner.definition
    }

    /// Opens a subscription onto the derived stream.
    #[must_use]
    pub fn subscribe(&self) -> DerivedSubscription<TFrom, TTo> {
        self.inner.subscribe()
    }

    /// Convenience read of the current derived value.
    pub async fn get(&self) -> StateResult<TTo> {
        self.subscribe().next().await
    }

    /// Publishes `value` to all subscribers immediately, without
    /// consuming a parent emission. The next parent emission supersedes
    /// it; nothing is persisted.
    pub fn force_value(&self, value: TTo) -> TTo {
        debug!(
            derivation = %self.inner.definition.cache_key(),
            "derived value forced"
        );
        self.inner
            .tx
            .send_replace(DerivedLoad::Ready(Ok(value.clone())));
        value
    }
}

impl<TFrom: StateValue, TTo: DerivedValue> Clone for DerivedState<TFrom, TTo> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One subscriber's handle onto a derived stream.
pub struct DerivedSubscription<TFrom: StateValue, TTo: DerivedValue> {
    rx: watch::Receiver<DerivedLoad<TTo>>,
    inner: Arc<DerivedInner<TFrom, TTo>>,
    started: bool,
}

impl<TFrom: StateValue, TTo: DerivedValue> DerivedSubscription<TFrom, TTo> {
    /// Waits for the next derived value: the replayed current value
    /// first, then one per parent emission (or forced value).
    pub async fn next(&mut self) -> StateResult<TTo> {
        loop {
            if self.started {
                self.rx
                    .changed()
                    .await
                    .map_err(|_| StateError::SubscriptionClosed)?;
            } else {
                self.rx
                    .wait_for(|load| matches!(load, DerivedLoad::Ready(_)))
                    .await
                    .map_err(|_| StateError::SubscriptionClosed)?;
                self.started = true;
            }

            let current = {
                let load = self.rx.borrow_and_update();
                match &*load {
                    DerivedLoad::Pending => None,
                    DerivedLoad::Ready(Ok(value)) => Some(Ok(value.clone())),
                    DerivedLoad::Ready(Err(e)) => Some(Err(StateError::Shared(Arc::clone(e)))),
                }
            };
            if let Some(result) = current {
                return result;
            }
        }
    }
}

impl<TFrom: StateValue, TTo: DerivedValue> Drop for DerivedSubscription<TFrom, TTo> {
    fn drop(&mut self) {
        self.inner.detach_subscriber();
    }
}

//! Stream abstractions over observed state.
//!
//! Derived state needs to observe any of the concrete state kinds
//! (global, single-user, active-user) through one seam; these traits are
//! that seam.

use crate::core::StateSubscription;
use crate::definitions::StateValue;
use crate::error::StateResult;
use async_trait::async_trait;

/// A pull-based subscription onto a state stream.
///
/// `next` yields the replayed current value first, then one value per
/// commit, mirroring the concrete subscription types.
#[async_trait]
pub trait StateStream<T>: Send {
    /// Waits for the next value.
    async fn next(&mut self) -> StateResult<Option<T>>;
}

#[async_trait]
impl<T: StateValue> StateStream<T> for StateSubscription<T> {
    async fn next(&mut self) -> StateResult<Option<T>> {
        StateSubscription::next(self).await
    }
}

/// Anything that can hand out subscriptions to a stream of `Option<T>`.
pub trait ObservedState<T: StateValue>: Send + Sync {
    /// Opens a new subscription onto this state's stream.
    fn observe(&self) -> Box<dyn StateStream<T>>;
}

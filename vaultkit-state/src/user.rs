//! Per-account state.

use crate::clear_events::{ClearEventRegistration, ClearEventService};
use crate::core::{StateCore, StateSubscription, UpdateOptions};
use crate::definitions::{StateValue, UserKeyDefinition};
use crate::error::StateResult;
use crate::stream::{ObservedState, StateStream};
use std::sync::Arc;
use vaultkit_types::{StorageTier, UserId};

/// State bound to one per-account slot for one fixed account.
#[derive(Clone)]
pub struct SingleUserState<T: StateValue> {
    user_id: UserId,
    definition: UserKeyDefinition<T>,
    tier: StorageTier,
    core: Arc<StateCore<T>>,
    clear_events: Arc<ClearEventService>,
}

impl<T: StateValue> SingleUserState<T> {
    pub(crate) fn new(
        user_id: UserId,
        definition: UserKeyDefinition<T>,
        tier: StorageTier,
        core: Arc<StateCore<T>>,
        clear_events: Arc<ClearEventService>,
    ) -> Self {
        Self {
            user_id,
            definition,
            tier,
            core,
            clear_events,
        }
    }

    /// The account this state is scoped to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The key definition this state is bound to.
    #[must_use]
    pub fn definition(&self) -> &UserKeyDefinition<T> {
        &self.definition
    }

    /// The storage key this state reads and writes.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        self.core.key()
    }

    /// Opens a subscription onto the slot's replay-one stream.
    #[must_use]
    pub fn subscribe(&self) -> StateSubscription<T> {
        self.core.subscribe()
    }

    /// Opens a subscription yielding `(user id, value)` pairs.
    #[must_use]
    pub fn subscribe_combined(&self) -> CombinedSubscription<T> {
        CombinedSubscription {
            user_id: self.user_id,
            inner: self.subscribe(),
        }
    }

    /// Convenience read of the current value through the shared stream.
    pub async fn get(&self) -> StateResult<Option<T>> {
        self.subscribe().next().await
    }

    /// Updates the slot for this account.
    ///
    /// A transition from stored-null to non-null registers the slot's
    /// declared clear events; any other transition registers nothing, and
    /// re-registration is a persisted no-op.
    pub async fn update<F>(&self, f: F) -> StateResult<Option<T>>
    where
        F: FnOnce(Option<T>) -> Option<T> + Send,
    {
        self.update_with::<(), _>(|state, _| f(state), UpdateOptions::default())
            .await
    }

    /// Updates the slot with an optional dependency stream and write
    /// predicate; see [`UpdateOptions`].
    pub async fn update_with<D, F>(
        &self,
        f: F,
        options: UpdateOptions<T, D>,
    ) -> StateResult<Option<T>>
    where
        D: Send + 'static,
        F: FnOnce(Option<T>, Option<&D>) -> Option<T> + Send,
    {
        let outcome = self.core.apply_update(f, options).await?;

        let became_set = outcome.written && outcome.previous_was_none && outcome.value.is_some();
        if became_set && !self.definition.clear_on().is_empty() {
            self.clear_events
                .register(
                    ClearEventRegistration {
                        tier: self.tier,
                        state: self.definition.state().name().to_string(),
                        key: self.definition.key().to_string(),
                    },
                    self.definition.clear_on(),
                )
                .await?;
        }

        Ok(outcome.value)
    }
}

impl<T: StateValue> ObservedState<T> for SingleUserState<T> {
    fn observe(&self) -> Box<dyn StateStream<T>> {
        Box::new(self.subscribe())
    }
}

/// Subscription pairing each value with the owning account id.
pub struct CombinedSubscription<T: StateValue> {
    user_id: UserId,
    inner: StateSubscription<T>,
}

impl<T: StateValue> CombinedSubscription<T> {
    /// Waits for the next `(user id, value)` pair.
    pub async fn next(&mut self) -> StateResult<(UserId, Option<T>)> {
        let value = self.inner.next().await?;
        Ok((self.user_id, value))
    }
}

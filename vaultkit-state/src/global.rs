//! Account-independent state.

use crate::core::{StateCore, StateSubscription, UpdateOptions};
use crate::definitions::{KeyDefinition, StateValue};
use crate::error::StateResult;
use crate::stream::{ObservedState, StateStream};
use std::sync::Arc;

/// State bound to one global slot, shared by every account.
///
/// Cheap to clone; all clones share the same underlying stream and write
/// queue (the provider caches one core per storage key).
#[derive(Clone)]
pub struct GlobalState<T: StateValue> {
    definition: KeyDefinition<T>,
    core: Arc<StateCore<T>>,
}

impl<T: StateValue> GlobalState<T> {
    pub(crate) fn new(definition: KeyDefinition<T>, core: Arc<StateCore<T>>) -> Self {
        Self { definition, core }
    }

    /// The key definition this state is bound to.
    #[must_use]
    pub fn definition(&self) -> &KeyDefinition<T> {
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

    /// Convenience read of the current value through the shared stream.
    pub async fn get(&self) -> StateResult<Option<T>> {
        self.subscribe().next().await
    }

    /// Updates the slot: reads the authoritative current value, applies
    /// `f`, persists and resolves to the result. Calls on the same slot
    /// are totally ordered.
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
        Ok(outcome.value)
    }
}

impl<T: StateValue> ObservedState<T> for GlobalState<T> {
    fn observe(&self) -> Box<dyn StateStream<T>> {
        Box::new(self.subscribe())
    }
}

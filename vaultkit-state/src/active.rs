//! Active-account state.
//!
//! Holds no storage key of its own: it follows the externally supplied
//! "current account" pointer and delegates to the matching single-user
//! state from the provider's shared pool. Switching accounts drops the
//! old delegate subscription and attaches a fresh one, so a previous
//! account's value is never replayed to the new account's observers.

use crate::core::UpdateOptions;
use crate::definitions::{StateValue, UserKeyDefinition};
use crate::error::{StateError, StateResult};
use crate::provider::ProviderInner;
use crate::stream::{ObservedState, StateStream};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use vaultkit_types::UserId;

/// How long an `update` waits for an account to become active before
/// failing with [`StateError::NoActiveUser`].
pub const ACTIVE_USER_TIMEOUT: Duration = Duration::from_millis(1000);

/// State for one per-account slot, always scoped to whichever account is
/// currently active.
#[derive(Clone)]
pub struct ActiveUserState<T: StateValue> {
    definition: UserKeyDefinition<T>,
    provider: Arc<ProviderInner>,
}

impl<T: StateValue> ActiveUserState<T> {
    pub(crate) fn new(definition: UserKeyDefinition<T>, provider: Arc<ProviderInner>) -> Self {
        Self {
            definition,
            provider,
        }
    }

    /// The key definition this state is bound to.
    #[must_use]
    pub fn definition(&self) -> &UserKeyDefinition<T> {
        &self.definition
    }

    /// Opens a subscription that follows the active account.
    ///
    /// While no account is active the subscription emits nothing; it
    /// starts emitting once an account signs in.
    #[must_use]
    pub fn subscribe(&self) -> ActiveUserSubscription<T> {
        let mut accounts = self.provider.accounts();
        let active = *accounts.borrow_and_update();
        let current = active.map(|user| self.attach(user));
        ActiveUserSubscription {
            definition: self.definition.clone(),
            provider: Arc::clone(&self.provider),
            accounts,
            current,
        }
    }

    /// Updates the slot for the account active at call time.
    ///
    /// Resolves the active account first (waiting up to
    /// [`ACTIVE_USER_TIMEOUT`] for one), then forwards to that account's
    /// single-user state; a concurrent switch does not retarget the
    /// in-flight write.
    pub async fn update<F>(&self, f: F) -> StateResult<(UserId, Option<T>)>
    where
        F: FnOnce(Option<T>) -> Option<T> + Send,
    {
        self.update_with::<(), _>(|state, _| f(state), UpdateOptions::default())
            .await
    }

    /// Updates with an optional dependency stream and write predicate;
    /// see [`UpdateOptions`].
    pub async fn update_with<D, F>(
        &self,
        f: F,
        options: UpdateOptions<T, D>,
    ) -> StateResult<(UserId, Option<T>)>
    where
        D: Send + 'static,
        F: FnOnce(Option<T>, Option<&D>) -> Option<T> + Send,
    {
        let user = self.resolve_active_user().await?;
        let state = self.provider.user(user, &self.definition);
        let value = state.update_with(f, options).await?;
        Ok((user, value))
    }

    async fn resolve_active_user(&self) -> StateResult<UserId> {
        let mut accounts = self.provider.accounts();
        if let Some(user) = *accounts.borrow_and_update() {
            return Ok(user);
        }
        debug!("no active account; waiting before failing the update");
        // Bound to a local so the watch ref is released before `accounts`.
        let resolved =
            match tokio::time::timeout(ACTIVE_USER_TIMEOUT, accounts.wait_for(Option::is_some))
                .await
            {
                Ok(Ok(user)) => (*user).ok_or(StateError::NoActiveUser(ACTIVE_USER_TIMEOUT)),
                Ok(Err(_)) => Err(StateError::SubscriptionClosed),
                Err(_) => Err(StateError::NoActiveUser(ACTIVE_USER_TIMEOUT)),
            };
        resolved
    }

    fn attach(&self, user: UserId) -> (UserId, Box<dyn StateStream<T>>) {
        let state = self.provider.user(user, &self.definition);
        (user, Box::new(state.subscribe()))
    }
}

impl<T: StateValue> ObservedState<T> for ActiveUserState<T> {
    fn observe(&self) -> Box<dyn StateStream<T>> {
        Box::new(self.subscribe())
    }
}

/// Subscription that retargets itself on every account switch.
pub struct ActiveUserSubscription<T: StateValue> {
    definition: UserKeyDefinition<T>,
    provider: Arc<ProviderInner>,
    accounts: watch::Receiver<Option<UserId>>,
    current: Option<(UserId, Box<dyn StateStream<T>>)>,
}

impl<T: StateValue> ActiveUserSubscription<T> {
    /// Waits for the next value of the currently active account's slot.
    ///
    /// Pends indefinitely while no account is active; never yields a
    /// value that belongs to a previously active account.
    pub async fn next(&mut self) -> StateResult<Option<T>> {
        loop {
            let switched = match &mut self.current {
                Some((_, stream)) => {
                    tokio::select! {
                        changed = self.accounts.changed() => {
                            changed.map_err(|_| StateError::SubscriptionClosed)?;
                            true
                        }
                        value = stream.next() => return value,
                    }
                }
                None => {
                    self.accounts
                        .changed()
                        .await
                        .map_err(|_| StateError::SubscriptionClosed)?;
                    true
                }
            };
            if switched {
                self.retarget();
            }
        }
    }

    /// The account this subscription is currently following, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<UserId> {
        self.current.as_ref().map(|(user, _)| *user)
    }

    fn retarget(&mut self) {
        let user = *self.accounts.borrow_and_update();
        debug!(user = ?user, "active-account subscription retargeted");
        self.current = user.map(|user| {
            let state = self.provider.user(user, &self.definition);
            let stream: Box<dyn StateStream<T>> = Box::new(state.subscribe());
            (user, stream)
        });
    }
}

#[async_trait]
impl<T: StateValue> StateStream<T> for ActiveUserSubscription<T> {
    async fn next(&mut self) -> StateResult<Option<T>> {
        ActiveUserSubscription::next(self).await
    }
}

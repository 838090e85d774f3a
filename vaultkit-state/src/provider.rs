//! The state provider facade.
//!
//! One provider per process composes the whole store: it owns the tier
//! backends, the active-account pointer, the per-key core registry, the
//! derive cache and the clear-event service, and hands out state handles
//! bound to definitions.
//!
//! The core registry is what guarantees at most one state core per
//! storage key per process; the per-core write lock then yields the total
//! write order per key. Both caches are explicit registries constructed
//! at bootstrap, string-keyed for cores and (parent identity, derivation
//! name)-keyed for derivations.

use crate::active::ActiveUserState;
use crate::clear_events::ClearEventService;
use crate::core::StateCore;
use crate::definitions::{DebugFlags, KeyDefinition, StateValue, UserKeyDefinition};
use crate::derived::{DeriveDefinition, DerivedInner, DerivedState, DerivedValue};
use crate::error::StateResult;
use crate::global::GlobalState;
use crate::stream::ObservedState;
use crate::user::SingleUserState;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;
use vaultkit_types::{ClearEvent, ClientKind, StorageTier, UserId};
use vaultkit_storage::StorageBackend;

/// The concrete backend behind each storage tier.
#[derive(Clone)]
pub struct TierBackends {
    memory: Arc<dyn StorageBackend>,
    disk: Arc<dyn StorageBackend>,
}

impl TierBackends {
    /// Maps both tiers to backends.
    #[must_use]
    pub fn new(memory: Arc<dyn StorageBackend>, disk: Arc<dyn StorageBackend>) -> Self {
        Self { memory, disk }
    }

    /// The backend serving `tier`.
    #[must_use]
    pub fn backend_for(&self, tier: StorageTier) -> &Arc<dyn StorageBackend> {
        match tier {
            StorageTier::Memory => &self.memory,
            StorageTier::Disk => &self.disk,
        }
    }
}

/// Shared provider internals; state handles keep this alive.
pub struct ProviderInner {
    client: ClientKind,
    backends: TierBackends,
    accounts: watch::Receiver<Option<UserId>>,
    cores: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    derived: Mutex<Vec<DerivedEntry>>,
    clear_events: Arc<ClearEventService>,
}

struct DerivedEntry {
    parent_ptr: usize,
    cache_key: String,
    parent_alive: Box<dyn Fn() -> bool + Send + Sync>,
    inner: Box<dyn Any + Send + Sync>,
}

impl ProviderInner {
    pub(crate) fn accounts(&self) -> watch::Receiver<Option<UserId>> {
        self.accounts.clone()
    }

    /// One core per storage key per process. Requesting an existing key
    /// with a different value type is a configuration error and panics.
    fn core_for<T: StateValue>(
        &self,
        key: String,
        tier: StorageTier,
        cleanup_delay: std::time::Duration,
        debug: DebugFlags,
    ) -> Arc<StateCore<T>> {
        let mut cores = self.cores.lock().expect("core registry mutex poisoned");
        if let Some(existing) = cores.get(&key) {
            return existing
                .downcast_ref::<Arc<StateCore<T>>>()
                .unwrap_or_else(|| {
                    panic!("state key {key} was requested with two different value types")
                })
                .clone();
        }
        debug!(key = %key, tier = %tier, "state core created");
        let core = StateCore::new(
            key.clone(),
            Arc::clone(self.backends.backend_for(tier)),
            cleanup_delay,
            debug,
        );
        cores.insert(key, Box::new(Arc::clone(&core)));
        core
    }

    pub(crate) fn global<T: StateValue>(&self, definition: &KeyDefinition<T>) -> GlobalState<T> {
        let tier = definition.state().tier_for(self.client);
        let core = self.core_for(
            definition.storage_key(),
            tier,
            definition.cleanup_delay(),
            definition.debug_flags(),
        );
        GlobalState::new(definition.clone(), core)
    }

    pub(crate) fn user<T: StateValue>(
        &self,
        user_id: UserId,
        definition: &UserKeyDefinition<T>,
    ) -> SingleUserState<T> {
        let tier = definition.state().tier_for(self.client);
        let core = self.core_for(
            definition.storage_key(user_id),
            tier,
            definition.cleanup_delay(),
            definition.debug_flags(),
        );
        SingleUserState::new(
            user_id,
            definition.clone(),
            tier,
            core,
            Arc::clone(&self.clear_events),
        )
    }
}

/// Entry point to the store.
#[derive(Clone)]
pub struct StateProvider {
    inner: Arc<ProviderInner>,
}

impl StateProvider {
    /// Builds a provider for one client process.
    ///
    /// `accounts` is the externally owned active-account pointer; the
    /// auth subsystem drives it, this store only follows it.
    #[must_use]
    pub fn new(
        client: ClientKind,
        backends: TierBackends,
        accounts: watch::Receiver<Option<UserId>>,
    ) -> Self {
        let clear_events = Arc::new(ClearEventService::new(backends.clone()));
        Self {
            inner: Arc::new(ProviderInner {
                client,
                backends,
                accounts,
                cores: Mutex::new(HashMap::new()),
                derived: Mutex::new(Vec::new()),
                clear_events,
            }),
        }
    }

    /// The client kind this provider resolves tier overrides for.
    #[must_use]
    pub fn client(&self) -> ClientKind {
        self.inner.client
    }

    /// State for an account-independent slot.
    #[must_use]
    pub fn global<T: StateValue>(&self, definition: &KeyDefinition<T>) -> GlobalState<T> {
        self.inner.global(definition)
    }

    /// State for a per-account slot, scoped to one fixed account.
    #[must_use]
    pub fn user<T: StateValue>(
        &self,
        user_id: UserId,
        definition: &UserKeyDefinition<T>,
    ) -> SingleUserState<T> {
        self.inner.user(user_id, definition)
    }

    /// State for a per-account slot, following the active account.
    #[must_use]
    pub fn active<T: StateValue>(&self, definition: &UserKeyDefinition<T>) -> ActiveUserState<T> {
        ActiveUserState::new(definition.clone(), Arc::clone(&self.inner))
    }

    /// A derived view over `parent`.
    ///
    /// Instances are cached per (parent identity, derivation name):
    /// repeated requests share one runner and one memo. Rows whose parent
    /// is no longer referenced anywhere are swept on access. Requesting a
    /// cached derivation with different types panics (configuration
    /// error).
    #[must_use]
    pub fn derive<TFrom, TTo>(
        &self,
        parent: &Arc<dyn ObservedState<TFrom>>,
        definition: &DeriveDefinition<TFrom, TTo>,
    ) -> DerivedState<TFrom, TTo>
    where
        TFrom: StateValue,
        TTo: DerivedValue,
    {
        let parent_ptr = Arc::as_ptr(parent) as *const () as usize;
        let cache_key = definition.cache_key();

        let mut derived = self
            .inner
            .derived
            .lock()
            .expect("derive cache mutex poisoned");
        derived.retain(|entry| (entry.parent_alive)());

        if let Some(entry) = derived
            .iter()
            .find(|e| e.parent_ptr == parent_ptr && e.cache_key == cache_key)
        {
            let inner = entry
                .inner
                .downcast_ref::<Arc<DerivedInner<TFrom, TTo>>>()
                .unwrap_or_else(|| {
                    panic!("derivation {cache_key} was requested with two different types")
                });
            return DerivedState::from_inner(Arc::clone(inner));
        }

        debug!(derivation = %cache_key, "derived state created");
        let inner = DerivedInner::new(Arc::downgrade(parent), definition.clone());
        let weak = Arc::downgrade(parent);
        derived.push(DerivedEntry {
            parent_ptr,
            cache_key,
            parent_alive: Box::new(move || weak.strong_count() > 0),
            inner: Box::new(Arc::clone(&inner)),
        });
        DerivedState::from_inner(inner)
    }

    /// The clear-event registry and runner.
    #[must_use]
    pub fn clear_events(&self) -> &Arc<ClearEventService> {
        &self.inner.clear_events
    }

    /// Services a lifecycle event for one account: clears every slot
    /// registered for `event`, leaving global state untouched.
    pub async fn handle_clear_event(&self, event: ClearEvent, user_id: UserId) -> StateResult<()> {
        self.inner.clear_events.handle_event(event, user_id).await
    }
}

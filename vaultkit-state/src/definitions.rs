//! State identity types.
//!
//! A [`StateDefinition`] names a domain of related slots and fixes its
//! default storage tier. A [`KeyDefinition`] (global) or
//! [`UserKeyDefinition`] (per-account) names one slot inside a domain.
//! Together they determine the storage key, which is part of the on-disk
//! format and must stay stable across releases:
//!
//! ```text
//! global_<domain>_<slot>
//! user_<userId>_<domain>_<slot>
//! ```
//!
//! Definitions are immutable and created once per domain, typically as
//! crate-level constants in the owning feature crate. Uniqueness of
//! (domain, slot) pairs is the caller's responsibility.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use vaultkit_types::{ClearEvent, ClientKind, StorageTier, UserId};

/// How long a state stream keeps its backend subscription alive after the
/// last subscriber detaches.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(1000);

/// Per-slot debug logging toggles.
///
/// All off by default. Enabled flags raise the slot's storage traffic to
/// info-level `tracing` events, for chasing read or write churn in the
/// field without turning on debug logging globally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Log every backend retrieval of this slot.
    pub log_retrievals: bool,
    /// Log every committed update of this slot.
    pub log_updates: bool,
}

/// Bound for values held in state slots.
///
/// Serde carries the (de)serializer, so a slot can never be declared
/// without one.
pub trait StateValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> StateValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A named domain of related state slots with a default storage tier.
#[derive(Debug, Clone)]
pub struct StateDefinition {
    name: Arc<str>,
    default_tier: StorageTier,
    client_tiers: HashMap<ClientKind, StorageTier>,
}

impl StateDefinition {
    /// Creates a state definition.
    ///
    /// # Panics
    ///
    /// Panics when `name` is empty, not longer than 3 characters, or
    /// contains spaces or underscores. Domain names are embedded in
    /// storage keys, where `_` is the separator.
    #[must_use]
    pub fn new(name: &str, default_tier: StorageTier) -> Self {
        assert!(
            name.chars().count() > 3,
            "state definition name {name:?} must be longer than 3 characters"
        );
        assert!(
            !name.contains(' ') && !name.contains('_'),
            "state definition name {name:?} must not contain spaces or underscores"
        );
        Self {
            name: Arc::from(name),
            default_tier,
            client_tiers: HashMap::new(),
        }
    }

    /// Overrides the storage tier for one client kind.
    #[must_use]
    pub fn with_client_tier(mut self, client: ClientKind, tier: StorageTier) -> Self {
        self.client_tiers.insert(client, tier);
        self
    }

    /// The domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The default storage tier.
    #[must_use]
    pub fn default_tier(&self) -> StorageTier {
        self.default_tier
    }

    /// Resolves the effective tier for a client kind.
    #[must_use]
    pub fn tier_for(&self, client: ClientKind) -> StorageTier {
        self.client_tiers
            .get(&client)
            .copied()
            .unwrap_or(self.default_tier)
    }
}

/// One account-independent state slot.
#[derive(Debug, Clone)]
pub struct KeyDefinition<T: StateValue> {
    state: StateDefinition,
    key: Arc<str>,
    cleanup_delay: Duration,
    debug: DebugFlags,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StateValue> KeyDefinition<T> {
    /// Creates a key definition for one slot in `state`.
    ///
    /// # Panics
    ///
    /// Panics when `key` is empty.
    #[must_use]
    pub fn new(state: StateDefinition, key: &str) -> Self {
        assert!(!key.is_empty(), "key definition slot key must not be empty");
        Self {
            state,
            key: Arc::from(key),
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            debug: DebugFlags::default(),
            _marker: PhantomData,
        }
    }

    /// Overrides the cleanup delay for this slot's stream.
    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Enables debug logging toggles for this slot.
    #[must_use]
    pub fn with_debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug = flags;
        self
    }

    /// The owning state definition.
    #[must_use]
    pub fn state(&self) -> &StateDefinition {
        &self.state
    }

    /// The slot key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The cleanup delay.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// The debug logging toggles.
    #[must_use]
    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    /// Builds the storage key for this slot.
    #[must_use]
    pub fn storage_key(&self) -> String {
        global_storage_key(self.state.name(), &self.key)
    }
}

/// One per-account state slot, annotated with lifecycle clear events.
#[derive(Debug, Clone)]
pub struct UserKeyDefinition<T: StateValue> {
    state: StateDefinition,
    key: Arc<str>,
    cleanup_delay: Duration,
    clear_on: Vec<ClearEvent>,
    debug: DebugFlags,
    _marker: PhantomData<fn() -> T>,
}

impl<T: StateValue> UserKeyDefinition<T> {
    /// Creates a per-account key definition for one slot in `state`.
    ///
    /// # Panics
    ///
    /// Panics when `key` is empty.
    #[must_use]
    pub fn new(state: StateDefinition, key: &str) -> Self {
        assert!(!key.is_empty(), "key definition slot key must not be empty");
        Self {
            state,
            key: Arc::from(key),
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            clear_on: Vec::new(),
            debug: DebugFlags::default(),
            _marker: PhantomData,
        }
    }

    /// Declares lifecycle events that clear this slot.
    #[must_use]
    pub fn with_clear_on(mut self, events: impl IntoIterator<Item = ClearEvent>) -> Self {
        self.clear_on.extend(events);
        self
    }

    /// Overrides the cleanup delay for this slot's streams.
    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Enables debug logging toggles for this slot.
    #[must_use]
    pub fn with_debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug = flags;
        self
    }

    /// The owning state definition.
    #[must_use]
    pub fn state(&self) -> &StateDefinition {
        &self.state
    }

    /// The slot key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The cleanup delay.
    #[must_use]
    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// The debug logging toggles.
    #[must_use]
    pub fn debug_flags(&self) -> DebugFlags {
        self.debug
    }

    /// The lifecycle events that clear this slot.
    #[must_use]
    pub fn clear_on(&self) -> &[ClearEvent] {
        &self.clear_on
    }

    /// Builds the storage key for this slot under one account.
    #[must_use]
    pub fn storage_key(&self, user_id: UserId) -> String {
        user_storage_key(user_id, self.state.name(), &self.key)
    }
}

/// Builds a global storage key. Stable on-disk format.
#[must_use]
pub fn global_storage_key(domain: &str, key: &str) -> String {
    format!("global_{domain}_{key}")
}

/// Builds a per-account storage key. Stable on-disk format.
#[must_use]
pub fn user_storage_key(user_id: UserId, domain: &str, key: &str) -> String {
    format!("user_{user_id}_{domain}_{key}")
}

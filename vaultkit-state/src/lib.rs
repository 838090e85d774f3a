//! Account-scoped reactive state store for Vaultkit clients.
//!
//! Every client surface (browser extension, desktop app, web vault, CLI)
//! keeps its locally cached application state — settings, vault metadata,
//! session secrets — behind this store: a uniform, observable, keyed
//! cache multiplexed per account over pluggable storage tiers.
//!
//! # Architecture
//!
//! - **Definitions**: [`StateDefinition`] names a domain and fixes its
//!   tier; [`KeyDefinition`]/[`UserKeyDefinition`] name one slot.
//! - **State core**: one shared replay-one stream plus a serialized
//!   write queue per storage key.
//! - **Wrappers**: [`GlobalState`] (account-independent),
//!   [`SingleUserState`] (one fixed account), [`ActiveUserState`]
//!   (follows the active-account pointer).
//! - **Derived state**: memoized pure views over any observed stream.
//! - **Clear events**: a persisted registry of slots to wipe on auth
//!   lifecycle events, and the runner that wipes them.
//! - **Provider**: the facade composing all of the above, one per
//!   process.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use vaultkit_state::{KeyDefinition, StateDefinition, StateProvider, TierBackends};
//! use vaultkit_storage::MemoryStorage;
//! use vaultkit_types::{ClientKind, StorageTier};
//!
//! # async fn demo() -> vaultkit_state::StateResult<()> {
//! let settings = StateDefinition::new("settings", StorageTier::Disk);
//! let theme: KeyDefinition<String> = KeyDefinition::new(settings, "theme");
//!
//! let (_account_tx, account_rx) = watch::channel(None);
//! let backends = TierBackends::new(
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(MemoryStorage::new()),
//! );
//! let provider = StateProvider::new(ClientKind::Desktop, backends, account_rx);
//!
//! let theme_state = provider.global(&theme);
//! theme_state.update(|_| Some("dark".to_string())).await?;
//! let mut sub = theme_state.subscribe();
//! assert_eq!(sub.next().await?, Some("dark".to_string()));
//! # Ok(())
//! # }
//! ```

mod active;
mod clear_events;
mod core;
mod definitions;
mod derived;
mod error;
mod global;
mod provider;
mod retention;
mod stream;
mod user;

pub use active::{ActiveUserState, ActiveUserSubscription, ACTIVE_USER_TIMEOUT};
pub use clear_events::{ClearEventRegistration, ClearEventService};
pub use core::{StateSubscription, UpdateOptions, DEFAULT_UPDATE_TIMEOUT};
pub use definitions::{
    global_storage_key, user_storage_key, DebugFlags, KeyDefinition, StateDefinition, StateValue,
    UserKeyDefinition, DEFAULT_CLEANUP_DELAY,
};
pub use derived::{DeriveDefinition, DerivedState, DerivedSubscription, DerivedValue};
pub use error::{StateError, StateResult};
pub use global::GlobalState;
pub use provider::{StateProvider, TierBackends};
pub use stream::{ObservedState, StateStream};
pub use user::{CombinedSubscription, SingleUserState};

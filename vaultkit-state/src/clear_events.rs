//! Clear-event registry and runner.
//!
//! Per-account slots can declare lifecycle events ("lock", "logout") that
//! must wipe them. Rather than every slot holding a live subscription to
//! the auth subsystem, slots are registered in a persisted table the
//! first time they actually hold data; when an event fires, the runner
//! walks the table and clears each registered slot for the affected
//! account only.

use crate::core::{StateCore, UpdateOptions};
use crate::definitions::{global_storage_key, user_storage_key, DebugFlags, DEFAULT_CLEANUP_DELAY};
use crate::error::StateResult;
use crate::provider::TierBackends;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use vaultkit_types::{ClearEvent, StorageTier, UserId};

/// Reserved domain holding the registration lists.
const REGISTRY_DOMAIN: &str = "clearEvents";

/// One registered (tier, domain, slot) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearEventRegistration {
    /// The tier the slot lives on.
    pub tier: StorageTier,
    /// The slot's domain name.
    pub state: String,
    /// The slot key.
    pub key: String,
}

/// Persisted clear-event registry plus the runner that services events.
pub struct ClearEventService {
    backends: TierBackends,
    slots: HashMap<ClearEvent, Arc<StateCore<Vec<ClearEventRegistration>>>>,
}

impl ClearEventService {
    /// Builds the service; registration lists persist on the disk tier
    /// under `global_clearEvents_<event>`.
    pub(crate) fn new(backends: TierBackends) -> Self {
        let slots = ClearEvent::ALL
            .into_iter()
            .map(|event| {
                let key = global_storage_key(REGISTRY_DOMAIN, event.as_str());
                let core = StateCore::new(
                    key,
                    Arc::clone(backends.backend_for(StorageTier::Disk)),
                    DEFAULT_CLEANUP_DELAY,
                    DebugFlags::default(),
                );
                (event, core)
            })
            .collect();
        Self { backends, slots }
    }

    /// Records `registration` under each of `events`.
    ///
    /// Appending is guarded by a persisted membership check, so
    /// re-registering an already known triple is a no-op with zero writes.
    pub async fn register(
        &self,
        registration: ClearEventRegistration,
        events: &[ClearEvent],
    ) -> StateResult<()> {
        for event in events {
            let slot = &self.slots[event];
            let wanted = registration.clone();
            let appended = registration.clone();
            let outcome = slot
                .apply_update::<(), _>(
                    move |list, _| {
                        let mut list = list.unwrap_or_default();
                        list.push(appended);
                        Some(list)
                    },
                    UpdateOptions::default().should_update(move |list: Option<&Vec<_>>, _| {
                        !list.is_some_and(|l| l.contains(&wanted))
                    }),
                )
                .await?;
            if outcome.written {
                debug!(
                    event = %event,
                    state = %registration.state,
                    key = %registration.key,
                    "clear-event registration added"
                );
            }
        }
        Ok(())
    }

    /// Clears every slot registered for `event`, scoped to `user_id`.
    ///
    /// Global state is never touched; only the per-account keys of the
    /// registered triples are written.
    pub async fn handle_event(&self, event: ClearEvent, user_id: UserId) -> StateResult<()> {
        let registrations = self.slots[&event].read().await?.unwrap_or_default();
        info!(
            event = %event,
            user = %user_id,
            slots = registrations.len(),
            "servicing clear event"
        );
        for registration in registrations {
            let key = user_storage_key(user_id, &registration.state, &registration.key);
            self.backends
                .backend_for(registration.tier)
                .save(&key, None)
                .await?;
            debug!(key = %key, "cleared slot for lifecycle event");
        }
        Ok(())
    }

    /// The registrations currently recorded for `event`.
    pub async fn registrations(&self, event: ClearEvent) -> StateResult<Vec<ClearEventRegistration>> {
        Ok(self.slots[&event].read().await?.unwrap_or_default())
    }
}

//! Lifecycle clear events.
//!
//! A clear event is a named auth-lifecycle trigger that wipes specific
//! per-account state slots. Slots opt in by listing the events in their
//! key definition; the clear-event runner performs the actual wipe.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A lifecycle event that clears registered per-account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearEvent {
    /// The account's vault was locked.
    Lock,
    /// The account was logged out.
    Logout,
}

impl ClearEvent {
    /// All known clear events, in a stable order.
    pub const ALL: [ClearEvent; 2] = [ClearEvent::Lock, ClearEvent::Logout];

    /// The stable string name used in persisted registration slots.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClearEvent::Lock => "lock",
            ClearEvent::Logout => "logout",
        }
    }
}

impl fmt::Display for ClearEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClearEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(ClearEvent::Lock),
            "logout" => Ok(ClearEvent::Logout),
            other => Err(Error::UnknownVariant(other.to_string())),
        }
    }
}

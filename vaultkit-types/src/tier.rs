//! Storage tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A class of storage backend.
///
/// State definitions declare a default tier; the provider maps each tier
/// to a concrete backend at bootstrap. Memory-tier values do not survive a
/// process restart, disk-tier values do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Volatile, process-local storage.
    Memory,
    /// Persistent on-device storage.
    Disk,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Memory => f.write_str("memory"),
            StorageTier::Disk => f.write_str("disk"),
        }
    }
}

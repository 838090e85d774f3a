//! Pluggable key/value storage backends for the Vaultkit state store.
//!
//! A backend is a flat key/value service for one storage tier. The state
//! layer never talks to persistence directly; it goes through the
//! [`StorageBackend`] trait, so hosts can plug in volatile, on-disk or
//! encrypted implementations per tier.
//!
//! # Contract
//!
//! - `get`/`save` address opaque string keys; values are raw JSON.
//! - `save(key, None)` clears the slot.
//! - Every successful save, by any writer, is published on the broadcast
//!   stream returned by `updates()`. Readers use it to re-emit without
//!   polling.

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change-notification channel.
///
/// A reader that falls further behind than this sees a lag error and must
/// recover by re-reading the backend.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// A change notification for one storage key.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUpdate {
    /// The key that was written.
    pub key: String,
    /// The value that was saved, or `None` for a clear.
    pub value: Option<Value>,
}

/// A key/value storage service for one tier.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Saves `value` under `key`; `None` clears the slot.
    ///
    /// On success the write is published to all update subscribers.
    async fn save(&self, key: &str, value: Option<Value>) -> StorageResult<()>;

    /// Subscribes to change notifications for every key in this backend.
    fn updates(&self) -> broadcast::Receiver<StorageUpdate>;
}

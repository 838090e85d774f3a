//! Volatile in-memory backend.

use crate::{StorageBackend, StorageResult, StorageUpdate, UPDATE_CHANNEL_CAPACITY};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// In-memory storage backend.
///
/// Backs the memory tier and most tests. Nothing survives a drop.
pub struct MemoryStorage {
    store: Mutex<HashMap<String, Value>>,
    updates: broadcast::Sender<StorageUpdate>,
}

impl MemoryStorage {
    /// Creates an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Seeds the store with initial contents without publishing updates.
    ///
    /// Intended for test setup that emulates pre-existing data on disk.
    pub fn seed(&self, entries: impl IntoIterator<Item = (String, Value)>) {
        let mut store = self.store.lock().expect("storage mutex poisoned");
        store.extend(entries);
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().expect("storage mutex poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let store = self.store.lock().expect("storage mutex poisoned");
        Ok(store.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Option<Value>) -> StorageResult<()> {
        {
            let mut store = self.store.lock().expect("storage mutex poisoned");
            match &value {
                Some(v) => {
                    store.insert(key.to_string(), v.clone());
                }
                None => {
                    store.remove(key);
                }
            }
        }
        // No subscribers is fine; the notification is best-effort.
        let _ = self.updates.send(StorageUpdate {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn updates(&self) -> broadcast::Receiver<StorageUpdate> {
        self.updates.subscribe()
    }
}

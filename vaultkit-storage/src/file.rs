//! JSON-file on-disk backend.

use crate::{StorageBackend, StorageResult, StorageUpdate, UPDATE_CHANNEL_CAPACITY};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// On-disk storage backend persisting the whole key space as one JSON file.
///
/// Client state caches are small (settings, metadata), so the simplest
/// durable representation wins: the full map is rewritten on every save,
/// via a temp file plus rename so a crash never leaves a torn file.
pub struct FileStorage {
    path: PathBuf,
    store: Mutex<HashMap<String, Value>>,
    updates: broadcast::Sender<StorageUpdate>,
}

impl FileStorage {
    /// Opens (or creates) a file-backed store at `path`.
    ///
    /// Existing contents are loaded eagerly; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let store = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened file storage");
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            store: Mutex::new(store),
            updates,
        })
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn persist(&self, store: &HashMap<String, Value>) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(store)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let store = self.store.lock().await;
        Ok(store.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Option<Value>) -> StorageResult<()> {
        let mut store = self.store.lock().await;
        match &value {
            Some(v) => {
                store.insert(key.to_string(), v.clone());
            }
            None => {
                store.remove(key);
            }
        }
        self.persist(&store).await?;
        drop(store);

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

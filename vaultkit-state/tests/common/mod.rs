//! Shared test helpers for state tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Semaphore};
use vaultkit_state::{StateProvider, TierBackends};
use vaultkit_storage::{MemoryStorage, StorageBackend, StorageResult, StorageUpdate};
use vaultkit_types::{ClientKind, UserId};

/// In-memory backend that counts reads and writes, so tests can assert
/// how often the store actually touches storage.
pub struct CountingStorage {
    inner: MemoryStorage,
    gets: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            gets: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        })
    }

    /// Seeds pre-existing data without counting or broadcasting.
    pub fn seed(&self, entries: impl IntoIterator<Item = (String, Value)>) {
        self.inner.seed(entries);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn save(&self, key: &str, value: Option<Value>) -> StorageResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, value).await
    }

    fn updates(&self) -> broadcast::Receiver<StorageUpdate> {
        self.inner.updates()
    }
}

/// In-memory backend whose reads block until released, for parking a
/// reader task mid-startup while writes land.
pub struct GatedStorage {
    inner: MemoryStorage,
    gate: Semaphore,
}

impl GatedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            gate: Semaphore::new(0),
        })
    }

    /// Lets one pending (or future) `get` proceed.
    pub fn release_get(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl StorageBackend for GatedStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.gate.acquire().await.expect("gate closed").forget();
        self.inner.get(key).await
    }

    async fn save(&self, key: &str, value: Option<Value>) -> StorageResult<()> {
        self.inner.save(key, value).await
    }

    fn updates(&self) -> broadcast::Receiver<StorageUpdate> {
        self.inner.updates()
    }
}

/// A provider wired to counting backends plus the account sender that
/// drives its active-account pointer.
pub struct TestBed {
    pub provider: StateProvider,
    pub accounts: Arc<watch::Sender<Option<UserId>>>,
    pub memory: Arc<CountingStorage>,
    pub disk: Arc<CountingStorage>,
}

pub fn test_bed(client: ClientKind) -> TestBed {
    let memory = CountingStorage::new();
    let disk = CountingStorage::new();
    let (accounts, accounts_rx) = watch::channel(None);
    let backends = TierBackends::new(
        Arc::clone(&memory) as Arc<dyn StorageBackend>,
        Arc::clone(&disk) as Arc<dyn StorageBackend>,
    );
    let provider = StateProvider::new(client, backends, accounts_rx);
    TestBed {
        provider,
        accounts: Arc::new(accounts),
        memory,
        disk,
    }
}

/// Lets spawned reader tasks drain pending notifications.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use keysweep_core::{KeyColumnStore, StorageError, StoreFeatures, StoreManager, StoreTransaction, TransactionConfig};

use crate::store::MemoryStore;

/// Manager over named in-memory stores.
///
/// Capability flags default to the most capable profile (consistent scan and
/// interruption both supported); tests downgrade them to drive the engine's
/// alternative strategies.
pub struct MemoryStoreManager {
    stores: DashMap<String, Arc<MemoryStore>>,
    features: StoreFeatures,
    rollbacks: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl MemoryStoreManager {
    pub fn new() -> Self {
        MemoryStoreManager {
            stores: DashMap::new(),
            features: StoreFeatures::default(),
            rollbacks: Arc::new(AtomicUsize::new(0)),
            latency: None,
        }
    }

    pub fn with_features(mut self, features: StoreFeatures) -> Self {
        self.features = features;
        self
    }

    /// Artificial delay applied to every cursor step; useful for holding a
    /// scan in flight long enough to cancel it.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Opens or creates the named store synchronously, for seeding data.
    pub fn store(&self, name: &str) -> Arc<MemoryStore> {
        self.stores.entry(name.to_owned()).or_insert_with(|| Arc::new(MemoryStore::new(name, self.latency))).clone()
    }

    /// How many transactions have been rolled back across all jobs.
    pub fn rollback_count(&self) -> usize { self.rollbacks.load(Ordering::SeqCst) }
}

impl Default for MemoryStoreManager {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl StoreManager for MemoryStoreManager {
    fn features(&self) -> StoreFeatures { self.features }

    async fn open_store(&self, name: &str) -> Result<Arc<dyn KeyColumnStore>, StorageError> {
        Ok(self.store(name))
    }

    async fn begin_transaction(&self, config: TransactionConfig) -> Result<Arc<dyn StoreTransaction>, StorageError> {
        Ok(Arc::new(MemoryTransaction {
            timestamp: config.timestamp,
            rolled_back: AtomicBool::new(false),
            rollbacks: self.rollbacks.clone(),
        }))
    }
}

/// Read-only transaction marker; rollback just releases it. A second
/// rollback is a benign no-op so racing cleanup paths stay idempotent.
pub struct MemoryTransaction {
    timestamp: DateTime<Utc>,
    rolled_back: AtomicBool,
    rollbacks: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    pub fn timestamp(&self) -> DateTime<Utc> { self.timestamp }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn rollback(&self) -> Result<(), StorageError> {
        if !self.rolled_back.swap(true, Ordering::SeqCst) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::query::{EntryList, Key, RangeQuery};

/// Capability flags a store declares once; the engine chooses its collection
/// and cancellation strategies from these at setup time.
#[derive(Debug, Clone, Copy)]
pub struct StoreFeatures {
    /// Independently issued per-query key iterations return keys in the same
    /// repeatable order across runs. Required for the client-side parallel
    /// merge; without it the engine falls back to one bundled store-side
    /// request.
    pub consistent_scan: bool,
    /// Forcibly interrupting an in-flight iteration task is safe. Without it
    /// the engine only ever flags tasks cooperatively, so a store that
    /// mishandles interruption is never corrupted.
    pub supports_interruption: bool,
}

impl Default for StoreFeatures {
    fn default() -> Self { StoreFeatures { consistent_scan: true, supports_interruption: true } }
}

/// Source of transaction timestamps. The builder defaults to [`SystemClock`].
pub trait TimestampProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl TimestampProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Consistency/timestamp configuration a transaction is begun with.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait StoreManager: Send + Sync {
    fn features(&self) -> StoreFeatures;

    /// Opens (and/or creates) the named key/column store.
    async fn open_store(&self, name: &str) -> Result<Arc<dyn KeyColumnStore>, StorageError>;

    async fn begin_transaction(&self, config: TransactionConfig) -> Result<Arc<dyn StoreTransaction>, StorageError>;
}

/// A scan only ever reads, so the one lifecycle operation the engine needs is
/// rollback, issued exactly once during cleanup.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    async fn rollback(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait KeyColumnStore: Send + Sync {
    fn name(&self) -> &str;

    /// One independent key iteration for a single range query. Keys yield in
    /// the store's total key order; each item carries the entries matching
    /// the query for that key. `max_key_length` guards against oversized keys
    /// on backends that must allocate range buffers.
    async fn key_slices(
        &self,
        query: RangeQuery,
        max_key_length: usize,
        tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn SliceCursor>, StorageError>;

    /// One bundled iteration over all declared queries at once. The store
    /// aligns results internally: every yielded key was matched by the first
    /// (grounding) query, and the entry lists are positionally aligned with
    /// `queries`.
    async fn aligned_slices(
        &self,
        queries: Vec<RangeQuery>,
        tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn AlignedCursor>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Pull cursor over `(key, entries)` pairs for one query.
#[async_trait]
pub trait SliceCursor: Send {
    async fn next(&mut self) -> Result<Option<(Key, EntryList)>, StorageError>;

    /// Releases the underlying iterator. Called exactly once by whichever
    /// side gets there first; must tolerate a prior close as a benign no-op.
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Pull cursor over store-aligned `(key, per-query entries)` items.
#[async_trait]
pub trait AlignedCursor: Send {
    async fn next(&mut self) -> Result<Option<(Key, Vec<EntryList>)>, StorageError>;

    async fn close(&mut self) -> Result<(), StorageError>;
}

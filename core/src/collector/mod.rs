//! Turns the store's per-key iteration primitives into one ordered stream of
//! joined [`Row`]s, pushed into the executor's shared row queue.
//!
//! Two strategies, chosen once from [`StoreFeatures::consistent_scan`]:
//! a single bundled store-side iteration when independent per-query key order
//! is not repeatable, or one puller task per query merged client-side when it
//! is.

mod parallel;
mod single;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ScanConfig;
use crate::error::{ScanError, StorageError};
use crate::job::KeyFilter;
use crate::query::{EntryList, Key, RangeQuery};
use crate::row::Row;
use crate::store::{KeyColumnStore, StoreFeatures, StoreTransaction};

pub(crate) use parallel::ParallelPullerCollector;
pub(crate) use single::SingleCursorCollector;

/// Upper bound on key size accepted from backends, in bytes.
pub(crate) const MAX_KEY_LENGTH: usize = 128;

/// Short poll applied to per-query queues to notice end-of-stream quickly.
pub(crate) const POLL_TICK: Duration = Duration::from_millis(10);

/// Bounded wait applied to each puller task during `join`.
pub(crate) const JOIN_GRACE: Duration = Duration::from_millis(10);

/// One `(key, entries)` result pulled ahead by a single query's iteration.
#[derive(Debug)]
pub(crate) struct SliceResult {
    pub key: Key,
    pub entries: EntryList,
}

pub(crate) enum RowsCollector {
    Single(SingleCursorCollector),
    Parallel(ParallelPullerCollector),
}

impl RowsCollector {
    /// Selects and constructs the strategy. Opens every storage-side iterator
    /// (and, in the parallel case, starts the puller tasks) before returning.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn open(
        store: Arc<dyn KeyColumnStore>,
        tx: Arc<dyn StoreTransaction>,
        features: StoreFeatures,
        queries: Vec<RangeQuery>,
        key_filter: KeyFilter,
        row_tx: mpsc::Sender<Row>,
        interrupt: Arc<AtomicBool>,
        graph_config: &ScanConfig,
    ) -> Result<Self, ScanError> {
        if features.consistent_scan {
            let collector =
                ParallelPullerCollector::open(store, tx, features, queries, key_filter, row_tx, interrupt, graph_config)
                    .await?;
            Ok(RowsCollector::Parallel(collector))
        } else {
            let collector = SingleCursorCollector::open(store, tx, queries, key_filter, row_tx, interrupt).await?;
            Ok(RowsCollector::Single(collector))
        }
    }

    /// Blocking production loop. Returns when the grounding source is
    /// exhausted, the interrupt flag is set, or a storage failure aborts the
    /// scan. Applies backpressure by blocking on the full row queue.
    pub(crate) async fn run(&mut self) -> Result<(), ScanError> {
        match self {
            RowsCollector::Single(c) => c.run().await,
            RowsCollector::Parallel(c) => c.run().await,
        }
    }

    /// Waits (bounded) for background production tasks to quiesce.
    pub(crate) async fn join(&mut self) {
        match self {
            RowsCollector::Single(_) => {} // no background tasks
            RowsCollector::Parallel(c) => c.join().await,
        }
    }

    /// Releases all storage-side iterators exactly once.
    pub(crate) async fn cleanup(&mut self) -> Result<(), StorageError> {
        match self {
            RowsCollector::Single(c) => c.cleanup().await,
            RowsCollector::Parallel(c) => c.cleanup().await,
        }
    }
}

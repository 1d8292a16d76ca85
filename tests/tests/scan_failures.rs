
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use common::*;
use keysweep_core::{
    AlignedCursor, ConfigValue, EntryList, Key, KeyColumnStore, Metric, RangeQuery, ScanConfig,
    ScanError, ScanState, Scanner, SliceCursor, StorageError, StoreFeatures, StoreManager,
    StoreTransaction, TransactionConfig,
};

/// A failure processing one row is charged to that row alone; the rest of the
/// keyspace still completes and the scan as a whole succeeds.
#[tokio::test]
async fn row_failures_are_isolated() -> Result<()> {
    let manager = seeded_manager(80);
    let scanner = Scanner::new(manager);

    let job = CountingJob::grounding_only().failing_on(|key| id_of(key) % 10 == 3);
    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .set_num_processing_threads(4)
        .execute()
        .await?;

    let metrics = handle.join().await?;
    assert_eq!(handle.state(), ScanState::Succeeded);
    assert_eq!(metrics.get(Metric::Failure), 8);
    assert_eq!(metrics.get(Metric::Success), 72);
    assert_eq!(metrics.get_custom(KEY_COUNT), 72);
    Ok(())
}

/// With more than one declared query, the first must cover the full keyspace;
/// otherwise setup fails before any row is pulled and the transaction is
/// rolled back.
#[tokio::test]
async fn narrow_grounding_query_fails_setup() -> Result<()> {
    let manager = seeded_manager(20);
    let scanner = Scanner::new(manager.clone());

    let job = CountingJob::new(vec![even_query(), RangeQuery::full_range()]);
    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .execute()
        .await?;

    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, ScanError::Setup(_)), "unexpected error: {err:?}");
    assert_eq!(handle.state(), ScanState::Failed);
    assert_eq!(manager.rollback_count(), 1);

    let metrics = handle.metrics();
    assert_eq!(metrics.get(Metric::Success), 0);
    assert_eq!(metrics.get(Metric::Failure), 0);
    Ok(())
}

/// A job declaring no queries at all is rejected the same way.
#[tokio::test]
async fn empty_query_list_fails_setup() -> Result<()> {
    let manager = seeded_manager(5);
    let scanner = Scanner::new(manager.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(CountingJob::new(vec![])))
        .execute()
        .await?;

    assert!(matches!(handle.join().await, Err(ScanError::Setup(_))));
    assert_eq!(manager.rollback_count(), 1);
    Ok(())
}

/// Store whose cursors yield one row and then hang forever, for driving the
/// stalled-puller watchdog.
struct StallingManager;

struct StallingStore;

struct StallingCursor {
    first: Option<(Key, EntryList)>,
}

struct NoopTransaction;

#[async_trait]
impl StoreTransaction for NoopTransaction {
    async fn rollback(&self) -> Result<(), StorageError> { Ok(()) }
}

#[async_trait]
impl StoreManager for StallingManager {
    fn features(&self) -> StoreFeatures {
        StoreFeatures { consistent_scan: true, supports_interruption: true }
    }

    async fn open_store(&self, _name: &str) -> Result<Arc<dyn KeyColumnStore>, StorageError> {
        Ok(Arc::new(StallingStore))
    }

    async fn begin_transaction(&self, _config: TransactionConfig) -> Result<Arc<dyn StoreTransaction>, StorageError> {
        Ok(Arc::new(NoopTransaction))
    }
}

#[async_trait]
impl KeyColumnStore for StallingStore {
    fn name(&self) -> &str { "stalling" }

    async fn key_slices(
        &self,
        _query: RangeQuery,
        _max_key_length: usize,
        _tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn SliceCursor>, StorageError> {
        Ok(Box::new(StallingCursor { first: Some((key_of(0), vec![])) }))
    }

    async fn aligned_slices(
        &self,
        _queries: Vec<RangeQuery>,
        _tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn AlignedCursor>, StorageError> {
        Err(StorageError::Permanent("aligned scan not supported".into()))
    }

    async fn close(&self) -> Result<(), StorageError> { Ok(()) }
}

#[async_trait]
impl SliceCursor for StallingCursor {
    async fn next(&mut self) -> Result<Option<(Key, EntryList)>, StorageError> {
        match self.first.take() {
            Some(item) => Ok(Some(item)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), StorageError> { Ok(()) }
}

/// A puller that stays alive but produces no data within the stall timeout is
/// treated as a storage failure, not waited on indefinitely.
#[tokio::test]
async fn stalled_puller_fails_the_scan() -> Result<()> {
    let scanner = Scanner::new(Arc::new(StallingManager));

    let mut graph_config = ScanConfig::new();
    graph_config.set(ScanConfig::STALL_TIMEOUT_MS, ConfigValue::Integer(200));

    let handle = scanner
        .build()
        .set_store_name("stalling")
        .set_job(Box::new(CountingJob::grounding_only()))
        .set_graph_configuration(graph_config)
        .execute()
        .await?;

    let err = handle.join().await.unwrap_err();
    assert!(
        matches!(err, ScanError::Storage(StorageError::Temporary(_))),
        "unexpected error: {err:?}"
    );
    assert_eq!(handle.state(), ScanState::Failed);
    Ok(())
}

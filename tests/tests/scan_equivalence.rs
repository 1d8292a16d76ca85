
use std::sync::Arc;

use anyhow::Result;

use common::*;
use keysweep_core::{Metric, RangeQuery, ScanMetrics, Scanner, StoreFeatures};
use keysweep_storage_memory::MemoryStoreManager;

async fn run_scan(consistent_scan: bool) -> Result<Arc<ScanMetrics>> {
    let features = StoreFeatures { consistent_scan, supports_interruption: true };
    let manager = Arc::new(MemoryStoreManager::new().with_features(features));
    seed_store(&manager.store("edgestore"), 64);
    let scanner = Scanner::new(manager);

    let job = CountingJob::new(vec![RangeQuery::full_range(), even_query()]).with_counter_names(vec!["all", "even"]);
    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .set_num_processing_threads(3)
        .execute()
        .await?;
    Ok(handle.join().await?)
}

/// The two collector strategies must be observationally equivalent on a
/// store that supports both: same rows, same per-query entry attribution.
#[tokio::test]
async fn collector_strategies_are_observationally_equivalent() -> Result<()> {
    let parallel = run_scan(true).await?;
    let single = run_scan(false).await?;

    for metrics in [&parallel, &single] {
        assert_eq!(metrics.get(Metric::Success), 64);
        assert_eq!(metrics.get(Metric::Failure), 0);
    }
    assert_eq!(parallel.get_custom(KEY_COUNT), single.get_custom(KEY_COUNT));
    assert_eq!(parallel.get_custom(TOTAL_COUNT), single.get_custom(TOTAL_COUNT));
    assert_eq!(parallel.get_custom("all"), single.get_custom("all"));
    assert_eq!(parallel.get_custom("even"), single.get_custom("even"));
    assert_eq!(parallel.get_custom("even"), 32);
    Ok(())
}

/// A narrow single query (no grounding requirement for one-query jobs) only
/// visits keys that match it, under either strategy.
#[tokio::test]
async fn single_narrow_query_visits_matching_keys_only() -> Result<()> {
    for consistent_scan in [true, false] {
        let features = StoreFeatures { consistent_scan, supports_interruption: true };
        let manager = Arc::new(MemoryStoreManager::new().with_features(features));
        seed_store(&manager.store("edgestore"), 30);
        let scanner = Scanner::new(manager);

        let handle = scanner
            .build()
            .set_store_name("edgestore")
            .set_job(Box::new(CountingJob::new(vec![even_query()])))
            .execute()
            .await?;
        let metrics = handle.join().await?;
        assert_eq!(metrics.get(Metric::Success), 15, "consistent_scan={consistent_scan}");
    }
    Ok(())
}

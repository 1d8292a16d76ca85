
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use common::*;
use keysweep_core::{Metric, RangeQuery, ScanState, Scanner};

#[tokio::test]
async fn every_key_is_processed_exactly_once() -> Result<()> {
    let manager = seeded_manager(100);
    let scanner = Scanner::new(manager.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(CountingJob::grounding_only()))
        .set_num_processing_threads(4)
        .execute()
        .await?;

    let metrics = handle.join().await?;
    assert_eq!(handle.state(), ScanState::Succeeded);
    assert_eq!(metrics.get(Metric::Success), 100);
    assert_eq!(metrics.get(Metric::Failure), 0);
    assert_eq!(metrics.get_custom(KEY_COUNT), 100);
    // success + failure always sums to the number of processed rows
    assert_eq!(metrics.get(Metric::Success) + metrics.get(Metric::Failure), metrics.get_custom(KEY_COUNT));
    Ok(())
}

#[tokio::test]
async fn grounding_plus_secondary_query_scenario() -> Result<()> {
    // 100 keys, one full-range grounding query, one query matching only the
    // even keys: SUCCESS=100, "even"=50.
    let manager = seeded_manager(100);
    let scanner = Scanner::new(manager.clone());

    let job = CountingJob::new(vec![RangeQuery::full_range(), even_query()]).with_counter_names(vec!["all", "even"]);
    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .set_num_processing_threads(2)
        .execute()
        .await?;

    let metrics = handle.join().await?;
    assert_eq!(metrics.get(Metric::Success), 100);
    assert_eq!(metrics.get_custom("all"), 100);
    assert_eq!(metrics.get_custom("even"), 50);
    Ok(())
}

#[tokio::test]
async fn key_filter_skips_rows_without_processing() -> Result<()> {
    let manager = seeded_manager(100);
    let scanner = Scanner::new(manager.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(CountingJob::grounding_only().with_modulus(4)))
        .execute()
        .await?;

    let metrics = handle.join().await?;
    assert_eq!(metrics.get(Metric::Success), 25);
    assert_eq!(metrics.get_custom(KEY_COUNT), 25);
    Ok(())
}

#[tokio::test]
async fn finish_callback_receives_final_metrics() -> Result<()> {
    let manager = seeded_manager(10);
    let scanner = Scanner::new(manager.clone());

    let called = Arc::new(AtomicBool::new(false));
    let called_in_callback = called.clone();
    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(CountingJob::grounding_only()))
        .set_finish_job(move |metrics| {
            assert_eq!(metrics.get(Metric::Success), 10);
            called_in_callback.store(true, Ordering::SeqCst);
        })
        .execute()
        .await?;

    handle.join().await?;
    assert!(called.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn metrics_are_readable_mid_run() -> Result<()> {
    let manager = Arc::new(keysweep_storage_memory::MemoryStoreManager::new().with_latency(std::time::Duration::from_millis(2)));
    seed_store(&manager.store("edgestore"), 50);
    let scanner = Scanner::new(manager.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(CountingJob::grounding_only()))
        .execute()
        .await?;

    // the live snapshot never exceeds the final total and never blocks
    let mid = handle.metrics().get(Metric::Success);
    assert!(mid <= 50);

    let metrics = handle.join().await?;
    assert_eq!(metrics.get(Metric::Success), 50);
    Ok(())
}


use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use common::*;
use keysweep_core::{Metric, Scanner};

/// With one worker, a work block size of 7 and 20 rows, the worker brackets
/// three chunks (7 + 7 + 6) on three distinct job clones, and the executor
/// brackets the whole run once on the original job instance.
#[tokio::test]
async fn work_blocks_rotate_job_clones() -> Result<()> {
    let manager = seeded_manager(20);
    let scanner = Scanner::new(manager);

    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let job = CountingJob::grounding_only().with_event_log(events.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .set_num_processing_threads(1)
        .set_work_block_size(7)
        .execute()
        .await?;
    let metrics = handle.join().await?;
    assert_eq!(metrics.get(Metric::Success), 20);
    assert_eq!(metrics.get_custom(SETUP_COUNT), 4);
    assert_eq!(metrics.get_custom(TEARDOWN_COUNT), 4);

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 8, "events: {events:?}");

    // The executor's own bracket opens first and closes last.
    let JobEvent::Start(master) = events[0] else { panic!("first event was {:?}", events[0]) };
    assert_eq!(*events.last().unwrap(), JobEvent::End(master));

    // The single worker runs its chunks sequentially, so between the outer
    // bracket the log is strict Start/End pairs on fresh instances.
    let mut seen = HashSet::from([master]);
    for pair in events[1..events.len() - 1].chunks(2) {
        let JobEvent::Start(instance) = pair[0] else { panic!("expected start, got {pair:?}") };
        assert_eq!(pair[1], JobEvent::End(instance));
        assert!(seen.insert(instance), "instance {instance} bracketed twice");
    }
    assert_eq!(seen.len(), 4);
    Ok(())
}

/// A worker that never receives a row stays silent: no start, no end. Only
/// workers that actually processed something appear in the lifecycle log.
#[tokio::test]
async fn idle_workers_skip_lifecycle_hooks() -> Result<()> {
    let manager = seeded_manager(1);
    let scanner = Scanner::new(manager);

    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let job = CountingJob::grounding_only().with_event_log(events.clone());

    let handle = scanner
        .build()
        .set_store_name("edgestore")
        .set_job(Box::new(job))
        .set_num_processing_threads(8)
        .execute()
        .await?;
    let metrics = handle.join().await?;
    assert_eq!(metrics.get(Metric::Success), 1);

    // One master pair plus exactly one worker pair; the other seven workers
    // never saw a row.
    assert_eq!(metrics.get_custom(SETUP_COUNT), 2);
    assert_eq!(metrics.get_custom(TEARDOWN_COUNT), 2);
    assert_eq!(events.lock().unwrap().len(), 4);
    Ok(())
}

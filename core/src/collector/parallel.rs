use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, warn};

use super::{SliceResult, JOIN_GRACE, MAX_KEY_LENGTH, POLL_TICK};
use crate::config::ScanConfig;
use crate::error::{ScanError, StorageError};
use crate::job::KeyFilter;
use crate::query::{EntryList, RangeQuery};
use crate::row::Row;
use crate::store::{KeyColumnStore, SliceCursor, StoreFeatures, StoreTransaction};

/// Shared handle on one query's storage iterator. The puller task owns the
/// pull loop but the cursor itself lives behind a mutex so cleanup can close
/// it exactly once even when the puller was aborted mid-pull.
type SharedCursor = Arc<Mutex<Option<Box<dyn SliceCursor>>>>;

struct PullerSlot {
    rx: mpsc::Receiver<SliceResult>,
    handle: Option<JoinHandle<()>>,
    /// Cooperative stop flag, the interruption path for stores that declare
    /// forced interruption unsafe.
    stop: Arc<AtomicBool>,
    cursor: SharedCursor,
}

/// Collection strategy for stores with consistent, repeatable per-query key
/// order: one dedicated puller task per declared query, each feeding a
/// bounded queue sized to the configured page size, merged client-side.
///
/// Merge invariant: each puller slot buffers at most one not-yet-consumed
/// result; a buffered result is consumed only when its key equals the row key
/// currently being assembled (taken from the grounding slot), otherwise it is
/// retained for a later row. This presumes every secondary query's key stream
/// is a subsequence of the grounding query's stream in the same total order,
/// a precondition of the store's consistent-scan capability, not something
/// defended against here.
pub(crate) struct ParallelPullerCollector {
    queries: Vec<RangeQuery>,
    slots: Vec<PullerSlot>,
    row_tx: mpsc::Sender<Row>,
    interrupt: Arc<AtomicBool>,
    supports_interruption: bool,
    stall_timeout: Duration,
}

impl ParallelPullerCollector {
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
        let page_size = graph_config.page_size();
        let mut slots = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            let cursor = store.key_slices(query.clone(), MAX_KEY_LENGTH, tx.clone()).await?;
            slots.push(Self::start_puller(index, cursor, key_filter.clone(), page_size));
        }
        Ok(ParallelPullerCollector {
            queries,
            slots,
            row_tx,
            interrupt,
            supports_interruption: features.supports_interruption,
            stall_timeout: graph_config.stall_timeout(),
        })
    }

    fn start_puller(index: usize, cursor: Box<dyn SliceCursor>, key_filter: KeyFilter, page_size: usize) -> PullerSlot {
        let (tx, rx) = mpsc::channel(page_size.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let cursor: SharedCursor = Arc::new(Mutex::new(Some(cursor)));
        let handle = tokio::spawn(Self::pull(index, cursor.clone(), tx, key_filter, stop.clone()));
        PullerSlot { rx, handle: Some(handle), stop, cursor }
    }

    /// One query's pull loop. Ends on exhaustion, storage error, a stop
    /// flag, or the merge side going away; ending closes its queue, which
    /// the merge loop reads as end-of-stream.
    async fn pull(
        index: usize,
        cursor: SharedCursor,
        tx: mpsc::Sender<SliceResult>,
        key_filter: KeyFilter,
        stop: Arc<AtomicBool>,
    ) {
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let pulled = {
                let mut guard = cursor.lock().await;
                let Some(cursor) = guard.as_mut() else { break };
                cursor.next().await
            };
            match pulled {
                Ok(Some((key, entries))) => {
                    if !(key_filter)(&key) {
                        continue;
                    }
                    if tx.send(SliceResult { key, entries }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(puller = index, error = %e, "could not load data from storage");
                    break;
                }
            }
        }
        // Close our own iterator unless cleanup already took it.
        let mut guard = cursor.lock().await;
        if let Some(mut cursor) = guard.take() {
            if let Err(e) = cursor.close().await {
                warn!(puller = index, error = %e, "could not close storage iterator");
            }
        }
    }

    pub(crate) async fn run(&mut self) -> Result<(), ScanError> {
        let num_queries = self.queries.len();
        let mut pending: Vec<Option<SliceResult>> = std::iter::repeat_with(|| None).take(num_queries).collect();

        while !self.interrupt.load(Ordering::Relaxed) {
            self.fill_pending(&mut pending).await?;

            // Termination condition: the grounding query has no more data.
            let Some(ground) = pending[0].as_ref() else { break };
            let key = ground.key.clone();

            let mut entries = HashMap::with_capacity(num_queries);
            for (i, query) in self.queries.iter().enumerate() {
                let matched = pending[i].take_if(|r| r.key == key).map(|r| r.entries).unwrap_or_else(EntryList::new);
                entries.insert(query.clone(), matched);
            }

            if self.row_tx.send(Row::new(key, entries)).await.is_err() {
                break; // every processor is gone
            }
        }
        Ok(())
    }

    /// Refills every empty slot. A closed queue is a normal end-of-stream for
    /// that query (its slot simply stays empty); a queue that is open but
    /// yields nothing within the stall bound means the storage path is
    /// broken, which fails the whole scan.
    async fn fill_pending(&mut self, pending: &mut [Option<SliceResult>]) -> Result<(), ScanError> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if pending[i].is_some() {
                continue;
            }
            // Try a very short time first to see whether we are already done.
            match timeout(POLL_TICK, slot.rx.recv()).await {
                Ok(result) => {
                    pending[i] = result;
                    continue;
                }
                Err(_) => {
                    // No data yet but the puller is still alive; give it more
                    // time, bounded by the stall timeout.
                    let deadline = Instant::now() + self.stall_timeout;
                    loop {
                        match timeout(POLL_TICK, slot.rx.recv()).await {
                            Ok(result) => {
                                pending[i] = result;
                                break;
                            }
                            Err(_) if Instant::now() >= deadline => {
                                return Err(ScanError::Storage(StorageError::Temporary(
                                    "timed out waiting for next row data - storage error likely".into(),
                                )));
                            }
                            Err(_) => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Bounded wait for every puller to quiesce. Stragglers are forcibly
    /// aborted when the store declares interruption safe, otherwise flagged
    /// to stop cooperatively and left to wind down on their own.
    pub(crate) async fn join(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(mut handle) = slot.handle.take() else { continue };
            if timeout(JOIN_GRACE, &mut handle).await.is_ok() {
                continue;
            }
            warn!(puller = i, "data puller did not terminate, forcing termination");
            if self.supports_interruption {
                handle.abort();
                let _ = handle.await;
            } else {
                warn!(puller = i, "store does not support interruption, flagging data puller to stop");
                slot.stop.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Closes every still-open per-query iterator exactly once. The first
    /// close failure is surfaced after a best-effort close of the remainder.
    pub(crate) async fn cleanup(&mut self) -> Result<(), StorageError> {
        // Stop any puller still running so it releases its cursor.
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.handle.take() {
                if !handle.is_finished() {
                    if self.supports_interruption {
                        handle.abort();
                        let _ = handle.await;
                    } else {
                        warn!("store does not support interruption, flagging data puller to stop");
                        slot.stop.store(true, Ordering::Relaxed);
                    }
                }
            }
        }

        let mut first_error = None;
        for (i, slot) in self.slots.iter().enumerate() {
            // A puller that cannot be interrupted may still be blocked inside
            // the cursor; it closes the cursor itself when it finally returns.
            let Ok(mut guard) = slot.cursor.try_lock() else {
                warn!(puller = i, "storage iterator still in use, leaving close to its puller");
                continue;
            };
            if let Some(mut cursor) = guard.take() {
                if let Err(e) = cursor.close().await {
                    warn!(puller = i, error = %e, "could not close storage iterator");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

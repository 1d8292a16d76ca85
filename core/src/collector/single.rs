use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{ScanError, StorageError};
use crate::job::KeyFilter;
use crate::query::RangeQuery;
use crate::row::Row;
use crate::store::{AlignedCursor, KeyColumnStore, StoreTransaction};

/// Collection strategy for stores without consistent per-query key order.
///
/// Issues one bundled multi-query request; the store aligns entries per key
/// internally, so the collector just drains a single cursor into the row
/// queue. No background tasks, no client-side merge.
pub(crate) struct SingleCursorCollector {
    queries: Vec<RangeQuery>,
    cursor: Option<Box<dyn AlignedCursor>>,
    key_filter: KeyFilter,
    row_tx: mpsc::Sender<Row>,
    interrupt: Arc<AtomicBool>,
}

impl SingleCursorCollector {
    pub(crate) async fn open(
        store: Arc<dyn KeyColumnStore>,
        tx: Arc<dyn StoreTransaction>,
        queries: Vec<RangeQuery>,
        key_filter: KeyFilter,
        row_tx: mpsc::Sender<Row>,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self, ScanError> {
        let cursor = store.aligned_slices(queries.clone(), tx).await?;
        Ok(SingleCursorCollector { queries, cursor: Some(cursor), key_filter, row_tx, interrupt })
    }

    pub(crate) async fn run(&mut self) -> Result<(), ScanError> {
        let Some(cursor) = self.cursor.as_mut() else { return Ok(()) };
        while !self.interrupt.load(Ordering::Relaxed) {
            let Some((key, entry_lists)) = cursor.next().await? else { break };
            if !(self.key_filter)(&key) {
                continue;
            }
            let mut entries = HashMap::with_capacity(self.queries.len());
            let mut lists = entry_lists.into_iter();
            for query in &self.queries {
                entries.insert(query.clone(), lists.next().unwrap_or_default());
            }
            if self.row_tx.send(Row::new(key, entries)).await.is_err() {
                // every processor is gone; nothing left to produce for
                break;
            }
        }
        Ok(())
    }

    pub(crate) async fn cleanup(&mut self) -> Result<(), StorageError> {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                warn!(error = %e, "could not close storage iterator");
                return Err(e);
            }
        }
        Ok(())
    }
}

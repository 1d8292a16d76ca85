use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use keysweep_core::{
    AlignedCursor, Entry, EntryList, Key, KeyColumnStore, RangeQuery, SliceCursor, StorageError, StoreTransaction,
};

type ColumnFamily = BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>;

/// One named in-memory key/column store: a key-ordered map of column maps.
///
/// Cursors snapshot the matching data at open, so every per-query iteration
/// over the same contents yields keys in the same repeatable order, which is
/// exactly the consistent-scan guarantee.
pub struct MemoryStore {
    name: String,
    data: RwLock<ColumnFamily>,
    closed: AtomicBool,
    cursor_closes: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub(crate) fn new(name: &str, latency: Option<Duration>) -> Self {
        MemoryStore {
            name: name.to_owned(),
            data: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            cursor_closes: Arc::new(AtomicUsize::new(0)),
            latency,
        }
    }

    pub fn put(&self, key: impl Into<Vec<u8>>, column: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let mut data = self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        data.entry(key.into()).or_default().insert(column.into(), value.into());
    }

    pub fn key_count(&self) -> usize {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// How many cursor close operations actually released an iterator.
    pub fn cursor_close_count(&self) -> usize { self.cursor_closes.load(Ordering::SeqCst) }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    fn entries_matching(columns: &BTreeMap<Vec<u8>, Vec<u8>>, query: &RangeQuery) -> EntryList {
        let mut entries: EntryList = columns
            .iter()
            .filter(|(column, _)| query.contains_column(column))
            .map(|(column, value)| Entry::new(column.clone(), value.clone()))
            .collect();
        if let Some(limit) = query.limit() {
            entries.truncate(limit);
        }
        entries
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::Permanent(format!("store {} is closed", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyColumnStore for MemoryStore {
    fn name(&self) -> &str { &self.name }

    async fn key_slices(
        &self,
        query: RangeQuery,
        max_key_length: usize,
        _tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn SliceCursor>, StorageError> {
        self.check_open()?;
        let data = self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut rows = VecDeque::new();
        for (key, columns) in data.iter() {
            if key.len() > max_key_length {
                return Err(StorageError::Permanent(format!(
                    "key length {} exceeds maximum of {max_key_length} bytes",
                    key.len()
                )));
            }
            let entries = Self::entries_matching(columns, &query);
            if !entries.is_empty() {
                rows.push_back((Key::from(key.clone()), entries));
            }
        }
        debug!(store = %self.name, rows = rows.len(), "opened slice cursor");
        Ok(Box::new(MemorySliceCursor {
            rows,
            open: true,
            closes: self.cursor_closes.clone(),
            latency: self.latency,
        }))
    }

    async fn aligned_slices(
        &self,
        queries: Vec<RangeQuery>,
        _tx: Arc<dyn StoreTransaction>,
    ) -> Result<Box<dyn AlignedCursor>, StorageError> {
        self.check_open()?;
        if queries.is_empty() {
            return Err(StorageError::Permanent("bundled request needs at least one query".into()));
        }
        let data = self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut rows = VecDeque::new();
        for (key, columns) in data.iter() {
            // The first query grounds the iteration: keys it does not match
            // are not part of the scan at all.
            let ground = Self::entries_matching(columns, &queries[0]);
            if ground.is_empty() {
                continue;
            }
            let mut lists = Vec::with_capacity(queries.len());
            lists.push(ground);
            for query in &queries[1..] {
                lists.push(Self::entries_matching(columns, query));
            }
            rows.push_back((Key::from(key.clone()), lists));
        }
        debug!(store = %self.name, rows = rows.len(), "opened aligned cursor");
        Ok(Box::new(MemoryAlignedCursor {
            rows,
            open: true,
            closes: self.cursor_closes.clone(),
            latency: self.latency,
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySliceCursor {
    rows: VecDeque<(Key, EntryList)>,
    open: bool,
    closes: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

#[async_trait]
impl SliceCursor for MemorySliceCursor {
    async fn next(&mut self) -> Result<Option<(Key, EntryList)>, StorageError> {
        if !self.open {
            return Err(StorageError::Permanent("cursor is closed".into()));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryAlignedCursor {
    rows: VecDeque<(Key, Vec<EntryList>)>,
    open: bool,
    closes: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

#[async_trait]
impl AlignedCursor for MemoryAlignedCursor {
    async fn next(&mut self) -> Result<Option<(Key, Vec<EntryList>)>, StorageError> {
        if !self.open {
            return Err(StorageError::Permanent("cursor is closed".into()));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

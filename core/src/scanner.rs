use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::executor::{FinishCallback, ScanHandle, ScannerExecutor};
use crate::job::ScanJob;
use crate::metrics::ScanMetrics;
use crate::store::{KeyColumnStore, StoreManager, SystemClock, TimestampProvider, TransactionConfig};

const DEFAULT_WORK_BLOCK_SIZE: usize = 10_000;

/// Top-level registry and entry point: configures and launches scan
/// executors, tracks running jobs by id, and supports global shutdown.
pub struct Scanner {
    manager: Arc<dyn StoreManager>,
    open_stores: Mutex<Vec<Arc<dyn KeyColumnStore>>>,
    running_jobs: DashMap<u64, ScanHandle>,
    next_job_id: AtomicU64,
}

impl Scanner {
    pub fn new(manager: Arc<dyn StoreManager>) -> Self {
        Scanner {
            manager,
            open_stores: Mutex::new(Vec::new()),
            running_jobs: DashMap::new(),
            next_job_id: AtomicU64::new(0),
        }
    }

    /// Fluent configuration surface for one scan job.
    pub fn build(&self) -> ScanBuilder<'_> {
        ScanBuilder {
            scanner: self,
            num_processing_threads: 1,
            work_block_size: DEFAULT_WORK_BLOCK_SIZE,
            timestamp_provider: Arc::new(SystemClock),
            store_name: None,
            job: None,
            job_config: ScanConfig::new(),
            graph_config: ScanConfig::new(),
            job_id: None,
            finish: None,
        }
    }

    /// The live handle for a registered, possibly still-running job.
    pub fn get_running_job(&self, job_id: u64) -> Option<ScanHandle> {
        self.running_jobs.get(&job_id).map(|entry| entry.value().clone())
    }

    /// Cancels every non-terminal executor and closes every store opened
    /// across jobs.
    pub async fn close(&self) {
        for entry in self.running_jobs.iter() {
            if !entry.value().is_done() {
                entry.value().cancel();
            }
        }
        let stores = {
            let mut open_stores = self.open_stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *open_stores)
        };
        for store in stores {
            if let Err(e) = store.close().await {
                warn!(store = store.name(), error = %e, "could not close store");
            }
        }
    }

    /// Registers a handle, lazily evicting terminal entries first. At most
    /// one live, non-terminal entry may exist per job id.
    fn register(&self, job_id: u64, handle: ScanHandle) -> Result<(), ScanError> {
        self.running_jobs.retain(|_, existing| !existing.is_done());
        if self.running_jobs.contains_key(&job_id) {
            return Err(ScanError::JobAlreadyRunning(job_id));
        }
        self.running_jobs.insert(job_id, handle);
        Ok(())
    }

    fn track_store(&self, store: Arc<dyn KeyColumnStore>) {
        let mut open_stores = self.open_stores.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        open_stores.push(store);
    }

    fn assign_job_id(&self) -> u64 { self.next_job_id.fetch_add(1, Ordering::Relaxed) }
}

/// Builder returned by [`Scanner::build`]. All setters are fluent; `execute`
/// validates that the required fields were provided.
pub struct ScanBuilder<'a> {
    scanner: &'a Scanner,
    num_processing_threads: usize,
    work_block_size: usize,
    timestamp_provider: Arc<dyn TimestampProvider>,
    store_name: Option<String>,
    job: Option<Box<dyn ScanJob>>,
    job_config: ScanConfig,
    graph_config: ScanConfig,
    job_id: Option<u64>,
    finish: Option<FinishCallback>,
}

impl<'a> ScanBuilder<'a> {
    /// Number of processing workers (>= 1).
    pub fn set_num_processing_threads(mut self, num: usize) -> Self {
        self.num_processing_threads = num;
        self
    }

    /// Rows per work block before the chunk hooks fire and the job is
    /// re-cloned (>= 1).
    pub fn set_work_block_size(mut self, size: usize) -> Self {
        self.work_block_size = size;
        self
    }

    pub fn set_timestamp_provider(mut self, provider: Arc<dyn TimestampProvider>) -> Self {
        self.timestamp_provider = provider;
        self
    }

    pub fn set_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    pub fn set_job(mut self, job: Box<dyn ScanJob>) -> Self {
        self.job = Some(job);
        self
    }

    pub fn set_job_configuration(mut self, config: ScanConfig) -> Self {
        self.job_config = config;
        self
    }

    pub fn set_graph_configuration(mut self, config: ScanConfig) -> Self {
        self.graph_config = config;
        self
    }

    /// Explicit job id; auto-assigned from an incrementing counter if unset.
    pub fn set_job_id(mut self, id: u64) -> Self {
        self.job_id = Some(id);
        self
    }

    /// Callback invoked with the final metrics when the job succeeds.
    pub fn set_finish_job(mut self, finish: impl FnOnce(Arc<ScanMetrics>) + Send + Sync + 'static) -> Self {
        self.finish = Some(Box::new(finish));
        self
    }

    /// Begins a store transaction, opens the named store, registers and
    /// starts the executor, and returns its completion handle. If anything
    /// fails after the transaction was opened, it is rolled back before the
    /// error propagates.
    pub async fn execute(self) -> Result<ScanHandle, ScanError> {
        let job = self.job.ok_or_else(|| ScanError::Setup("need to specify a scan job".into()))?;
        let store_name = self.store_name.ok_or_else(|| ScanError::Setup("need to specify a store name".into()))?;
        if self.num_processing_threads < 1 {
            return Err(ScanError::Setup("need at least one processing thread".into()));
        }
        if self.work_block_size < 1 {
            return Err(ScanError::Setup("work block size must be at least 1".into()));
        }

        let scanner = self.scanner;
        let job_id = self.job_id.unwrap_or_else(|| scanner.assign_job_id());

        let tx = scanner
            .manager
            .begin_transaction(TransactionConfig { timestamp: self.timestamp_provider.now() })
            .await?;

        // From here on the transaction must not leak on failure.
        let store = match scanner.manager.open_store(&store_name).await {
            Ok(store) => store,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e.into());
            }
        };
        scanner.track_store(store.clone());

        let (executor, handle) = ScannerExecutor::new(
            job_id,
            job,
            self.finish,
            store,
            tx.clone(),
            scanner.manager.features(),
            self.num_processing_threads,
            self.work_block_size,
            self.job_config,
            self.graph_config,
        );

        if let Err(e) = scanner.register(job_id, handle.clone()) {
            let _ = tx.rollback().await;
            return Err(e);
        }

        debug!(job_id, "starting scan executor");
        executor.spawn();
        Ok(handle)
    }
}

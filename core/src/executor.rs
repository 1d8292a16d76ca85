use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::collector::RowsCollector;
use crate::config::ScanConfig;
use crate::error::{ScanError, StorageError};
use crate::job::ScanJob;
use crate::metrics::{Metric, ScanMetrics};
use crate::row::Row;
use crate::store::{KeyColumnStore, StoreFeatures, StoreTransaction};

/// How long each processor waits on the shared row queue per poll; short so
/// the finish signal is noticed promptly.
const PROCESSOR_POLL: Duration = Duration::from_millis(100);

/// Outer bound on waiting for processors to drain and terminate.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Lifecycle of one scan execution. The three terminal states are mutually
/// exclusive and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    SettingUp,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Succeeded | ScanState::Failed | ScanState::Cancelled)
    }
}

pub(crate) type FinishCallback = Box<dyn FnOnce(Arc<ScanMetrics>) + Send + Sync + 'static>;

struct ExecutorShared {
    metrics: Arc<ScanMetrics>,
    /// Set by [`ScanHandle::cancel`]; observed by the collector's production
    /// loop and by the executor at its decision points.
    interrupt: Arc<AtomicBool>,
    /// One-shot guard around collector cleanup + transaction rollback.
    cleanup_done: AtomicBool,
    result: OnceLock<Result<Arc<ScanMetrics>, ScanError>>,
}

/// The cancellable, pollable handle to an in-flight or finished scan job.
///
/// Cheap to clone; every clone observes the same run. Metrics are readable at
/// any time for a live (possibly still-changing) snapshot.
#[derive(Clone)]
pub struct ScanHandle {
    job_id: u64,
    state_rx: watch::Receiver<ScanState>,
    shared: Arc<ExecutorShared>,
}

impl ScanHandle {
    pub fn job_id(&self) -> u64 { self.job_id }

    pub fn state(&self) -> ScanState { *self.state_rx.borrow() }

    pub fn is_done(&self) -> bool { self.state().is_terminal() }

    /// Live metrics for this run, valid mid-run and after completion.
    pub fn metrics(&self) -> Arc<ScanMetrics> { self.shared.metrics.clone() }

    /// Requests cancellation: cooperative, observed by the collector after
    /// its current unit of work. The run resolves to
    /// [`ScanState::Cancelled`] with [`ScanError::Interrupted`].
    pub fn cancel(&self) { self.shared.interrupt.store(true, Ordering::Relaxed) }

    /// Waits for the run to reach a terminal state and returns its outcome.
    pub async fn join(&self) -> Result<Arc<ScanMetrics>, ScanError> {
        let mut state_rx = self.state_rx.clone();
        while !state_rx.borrow().is_terminal() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        match self.shared.result.get() {
            Some(result) => result.clone(),
            // The driving task publishes the result before the terminal
            // state; reaching this means it died without resolving.
            None => Err(ScanError::Interrupted),
        }
    }
}

/// Orchestrates one collector plus a pool of processing workers over a shared
/// bounded row queue, and resolves the completion handle.
pub(crate) struct ScannerExecutor {
    job: Box<dyn ScanJob>,
    finish: Option<FinishCallback>,
    store: Arc<dyn KeyColumnStore>,
    tx: Arc<dyn StoreTransaction>,
    features: StoreFeatures,
    num_processors: usize,
    work_block_size: usize,
    job_config: ScanConfig,
    graph_config: ScanConfig,
    shared: Arc<ExecutorShared>,
    state_tx: watch::Sender<ScanState>,
}

impl ScannerExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job_id: u64,
        job: Box<dyn ScanJob>,
        finish: Option<FinishCallback>,
        store: Arc<dyn KeyColumnStore>,
        tx: Arc<dyn StoreTransaction>,
        features: StoreFeatures,
        num_processors: usize,
        work_block_size: usize,
        job_config: ScanConfig,
        graph_config: ScanConfig,
    ) -> (Self, ScanHandle) {
        let (state_tx, state_rx) = watch::channel(ScanState::SettingUp);
        let shared = Arc::new(ExecutorShared {
            metrics: Arc::new(ScanMetrics::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            cleanup_done: AtomicBool::new(false),
            result: OnceLock::new(),
        });
        let handle = ScanHandle { job_id, state_rx, shared: shared.clone() };
        let executor = ScannerExecutor {
            job,
            finish,
            store,
            tx,
            features,
            num_processors,
            work_block_size,
            job_config,
            graph_config,
            shared,
            state_tx,
        };
        (executor, handle)
    }

    /// Starts the driving task. The caller keeps the handle; the executor
    /// runs to a terminal state on its own worker.
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let metrics = self.shared.metrics.clone();
        self.job.worker_iteration_start(&self.job_config, &self.graph_config, &metrics);

        // Setting-up: validate preconditions and construct the collector.
        // Any failure here fails the whole job before a single worker starts.
        let (mut collector, row_rx) = match self.setup().await {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "exception trying to set up the scan job");
                self.cleanup_silent(None).await;
                self.job.worker_iteration_end(&metrics);
                self.resolve(ScanState::Failed, Err(e));
                return;
            }
        };

        let _ = self.state_tx.send(ScanState::Running);

        let row_rx = Arc::new(Mutex::new(row_rx));
        let processors_finish = Arc::new(AtomicBool::new(false));
        let mut processor_handles = Vec::with_capacity(self.num_processors);
        for index in 0..self.num_processors {
            let processor = Processor {
                index,
                job: self.job.clone_job(),
                queue: row_rx.clone(),
                finish: processors_finish.clone(),
                work_block_size: self.work_block_size,
                job_config: self.job_config.clone(),
                graph_config: self.graph_config.clone(),
                metrics: metrics.clone(),
            };
            processor_handles.push(tokio::spawn(processor.run()));
        }

        // Running: this task itself drives the collector to completion.
        let outcome = async {
            collector.run().await?;
            collector.join().await;
            Ok::<(), ScanError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                // Let every processor drain its share of the queue, bounded.
                processors_finish.store(true, Ordering::Release);
                if timeout(SHUTDOWN_TIMEOUT, join_all(&mut processor_handles)).await.is_err() {
                    error!("processor did not terminate in time");
                    for handle in &processor_handles {
                        handle.abort();
                    }
                }

                let cleanup_result = self.cleanup(Some(&mut collector)).await;
                self.job.worker_iteration_end(&metrics);

                if self.shared.interrupt.load(Ordering::Relaxed) {
                    self.resolve(ScanState::Cancelled, Err(ScanError::Interrupted));
                } else if let Err(e) = cleanup_result {
                    // Cleanup was the only failing step, so it is the outcome.
                    self.resolve(ScanState::Failed, Err(e.into()));
                } else {
                    if let Some(finish) = self.finish.take() {
                        finish(metrics.clone());
                    }
                    self.resolve(ScanState::Succeeded, Ok(metrics.clone()));
                }
            }
            Err(e) => {
                error!(error = %e, "exception occurred during scan job execution");
                processors_finish.store(true, Ordering::Release);
                for handle in &processor_handles {
                    handle.abort();
                }
                self.cleanup_silent(Some(&mut collector)).await;
                self.job.worker_iteration_end(&metrics);
                self.resolve(ScanState::Failed, Err(e));
            }
        }
    }

    /// Validates the query list, sizes the shared row queue, and constructs
    /// the collector strategy from the store's consistency capability.
    async fn setup(&mut self) -> Result<(RowsCollector, mpsc::Receiver<Row>), ScanError> {
        let queries = self.job.queries();
        if queries.is_empty() {
            return Err(ScanError::Setup("job must specify at least one query".into()));
        }
        if queries.len() > 1 && !queries[0].covers_full_keyspace() {
            return Err(ScanError::Setup(format!(
                "expected first query to cover the entire keyspace, got {:?}",
                queries[0]
            )));
        }

        let capacity = self.graph_config.page_size() * self.num_processors * queries.len();
        let (row_tx, row_rx) = mpsc::channel(capacity.max(1));

        let collector = RowsCollector::open(
            self.store.clone(),
            self.tx.clone(),
            self.features,
            queries,
            self.job.key_filter(),
            row_tx,
            self.shared.interrupt.clone(),
            &self.graph_config,
        )
        .await?;
        debug!(
            parallel = self.features.consistent_scan,
            processors = self.num_processors,
            queue_capacity = capacity,
            "scan collector constructed"
        );
        Ok((collector, row_rx))
    }

    /// Exactly-once cleanup: release the collector's iterators and roll the
    /// transaction back. A close failure is surfaced but never masks the
    /// rollback attempt, nor vice versa; the first error wins.
    async fn cleanup(&self, collector: Option<&mut RowsCollector>) -> Result<(), StorageError> {
        if self.shared.cleanup_done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let iter_result = match collector {
            Some(collector) => collector.cleanup().await,
            None => Ok(()),
        };
        let tx_result = self.tx.rollback().await;
        iter_result.and(tx_result)
    }

    async fn cleanup_silent(&self, collector: Option<&mut RowsCollector>) {
        if let Err(e) = self.cleanup(collector).await {
            error!(error = %e, "encountered exception when trying to clean up after failure");
        }
    }

    fn resolve(&self, state: ScanState, result: Result<Arc<ScanMetrics>, ScanError>) {
        // Result first so `join` never observes a terminal state without one.
        let _ = self.shared.result.set(result);
        let _ = self.state_tx.send(state);
    }
}

/// One processing worker: polls the shared row queue, applies the job
/// callback with row-level failure isolation, and rotates to a fresh job
/// clone at every work-block boundary.
struct Processor {
    index: usize,
    job: Box<dyn ScanJob>,
    queue: Arc<Mutex<mpsc::Receiver<Row>>>,
    finish: Arc<AtomicBool>,
    work_block_size: usize,
    job_config: ScanConfig,
    graph_config: ScanConfig,
    metrics: Arc<ScanMetrics>,
}

impl Processor {
    async fn run(mut self) {
        let mut started = false;
        let mut processed_in_block = 0usize;
        loop {
            let polled = {
                let mut queue = self.queue.lock().await;
                timeout(PROCESSOR_POLL, queue.recv()).await
            };
            match polled {
                Ok(Some(row)) => {
                    if !started {
                        // First row ever seen by this worker opens its first
                        // work block; a worker that never receives a row
                        // never calls the lifecycle hooks at all.
                        self.job.worker_iteration_start(&self.job_config, &self.graph_config, &self.metrics);
                        started = true;
                    }
                    if processed_in_block >= self.work_block_size {
                        self.rotate_chunk();
                        processed_in_block = 0;
                    }
                    self.process_row(row).await;
                    processed_in_block += 1;
                }
                // Queue closed and drained: the collector is gone for good.
                Ok(None) => break,
                Err(_) => {
                    if self.finish.load(Ordering::Acquire) {
                        break;
                    }
                    // Empty poll while rows might still arrive; keep looping.
                }
            }
        }
        if started {
            self.job.worker_iteration_end(&self.metrics);
        }
    }

    /// Work-block boundary: end the current chunk, swap in a fresh clone,
    /// start the next chunk. Bounds per-chunk state and gives the job a
    /// natural checkpoint.
    fn rotate_chunk(&mut self) {
        self.job.worker_iteration_end(&self.metrics);
        self.job = self.job.clone_job();
        self.job.worker_iteration_start(&self.job_config, &self.graph_config, &self.metrics);
    }

    async fn process_row(&mut self, row: Row) {
        match self.job.process(row.key(), row.entries(), &self.metrics).await {
            Ok(()) => self.metrics.increment(Metric::Success),
            Err(e) => {
                // Row-level failure isolation: log and count, never abort.
                error!(worker = self.index, key = ?row.key(), error = %e, "exception processing row");
                self.metrics.increment(Metric::Failure);
            }
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ScanConfig;
use crate::metrics::ScanMetrics;
use crate::query::{EntryList, Key, RangeQuery};

/// Predicate over keys; rows whose key fails it are skipped before `process`.
pub type KeyFilter = Arc<dyn Fn(&Key) -> bool + Send + Sync>;

/// The computation a scan drives: invoked once per joined row.
///
/// The engine gives every processing worker, and every work-block boundary
/// within a worker, its own instance via [`ScanJob::clone_job`], so `process`
/// is never called concurrently on the same instance and per-chunk state
/// never aliases across workers.
#[async_trait]
pub trait ScanJob: Send + Sync {
    /// The ordered, non-empty list of range queries this job wants joined per
    /// key. With more than one query, the first must cover the entire column
    /// keyspace ([`RangeQuery::covers_full_keyspace`]); the engine rejects
    /// the job otherwise.
    fn queries(&self) -> Vec<RangeQuery>;

    fn key_filter(&self) -> KeyFilter { Arc::new(|_| true) }

    /// Start of a work block. Paired with [`ScanJob::worker_iteration_end`];
    /// a worker that never receives a row calls neither.
    fn worker_iteration_start(&mut self, _job_config: &ScanConfig, _graph_config: &ScanConfig, _metrics: &ScanMetrics) {}

    fn worker_iteration_end(&mut self, _metrics: &ScanMetrics) {}

    /// Process one row. An `Err` is isolated: logged, counted as a failure,
    /// and the scan moves on to the next row.
    async fn process(
        &mut self,
        key: &Key,
        entries: &HashMap<RangeQuery, EntryList>,
        metrics: &ScanMetrics,
    ) -> anyhow::Result<()>;

    /// An independent copy with equivalent configuration and no shared
    /// mutable state with the original.
    fn clone_job(&self) -> Box<dyn ScanJob>;
}

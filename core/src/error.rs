use thiserror::Error;

/// Failures originating at the store boundary.
///
/// The temporary/permanent split matters to callers: temporary failures (a
/// stalled iterator, a flaky node) may succeed on retry, permanent ones will
/// not. Both are cloneable so a terminal scan outcome can be handed to every
/// holder of a completion handle.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("temporary storage failure: {0}")]
    Temporary(String),

    #[error("permanent storage failure: {0}")]
    Permanent(String),

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("transaction failure: {0}")]
    Transaction(String),

    #[error("failed to close storage iterator: {0}")]
    IteratorClose(String),
}

/// Failures of a scan job as a whole.
///
/// Row-level callback errors are *not* represented here; those are isolated
/// and counted, never propagated (see [`crate::metrics::Metric::Failure`]).
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Bad preconditions caught before any worker starts: empty query list,
    /// missing grounding query, missing builder fields.
    #[error("invalid scan setup: {0}")]
    Setup(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The scan was cancelled through its completion handle.
    #[error("scan was interrupted")]
    Interrupted,

    /// A still-running executor is already registered under this job id.
    #[error("job {0} is still running")]
    JobAlreadyRunning(u64),
}

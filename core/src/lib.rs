pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod query;
pub mod row;
pub mod scanner;
pub mod store;

pub(crate) mod collector;
pub(crate) mod executor;

pub use config::{ConfigValue, ScanConfig};
pub use error::{ScanError, StorageError};
pub use executor::{ScanHandle, ScanState};
pub use job::{KeyFilter, ScanJob};
pub use metrics::{Metric, ScanMetrics};
pub use query::{Entry, EntryList, Key, RangeQuery};
pub use row::Row;
pub use scanner::{ScanBuilder, Scanner};
pub use store::{
    AlignedCursor, KeyColumnStore, SliceCursor, StoreFeatures, StoreManager, StoreTransaction,
    SystemClock, TimestampProvider, TransactionConfig,
};

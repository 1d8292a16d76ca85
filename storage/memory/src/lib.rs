//! An in-memory key/column store backend for the keysweep scan engine.
//!
//! Primarily a test and reference backend: it implements the full store
//! boundary with configurable capability flags (so both collector strategies
//! and both cancellation strategies can be exercised), optional per-item
//! latency, and rollback/close accounting that tests assert against.

mod engine;
mod store;

pub use engine::{MemoryStoreManager, MemoryTransaction};
pub use store::MemoryStore;

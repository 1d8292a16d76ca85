use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// The fixed counters every scan maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Rows whose `process` call returned without error.
    Success,
    /// Rows whose `process` call failed and was isolated.
    Failure,
}

/// Thread-safe counters for one execution of one scan job.
///
/// Two independent spaces: the fixed [`Metric`] pair and an open-ended named
/// space. All counters start at zero and only ever grow; increments are safe
/// from any worker concurrently. The same instance backs the live
/// mid-run snapshot exposed by [`crate::ScanHandle::metrics`], so reads may
/// observe a still-changing total.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    custom: DashMap<String, AtomicU64>,
}

impl ScanMetrics {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Success => self.success.load(Ordering::Relaxed),
            Metric::Failure => self.failure.load(Ordering::Relaxed),
        }
    }

    pub fn increment(&self, metric: Metric) {
        match metric {
            Metric::Success => self.success.fetch_add(1, Ordering::Relaxed),
            Metric::Failure => self.failure.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn get_custom(&self, name: &str) -> u64 {
        self.custom.get(name).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn increment_custom(&self, name: &str) { self.add_custom(name, 1) }

    pub fn add_custom(&self, name: &str, delta: u64) {
        if let Some(counter) = self.custom.get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.custom.entry(name.to_owned()).or_default().fetch_add(delta, Ordering::Relaxed);
    }

    /// Point-in-time copy of the named counter space.
    pub fn custom_counters(&self) -> Vec<(String, u64)> {
        self.custom.iter().map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed))).collect()
    }
}

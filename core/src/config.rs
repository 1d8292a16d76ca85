use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_STALL_TIMEOUT_MS: u64 = 180_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self { ConfigValue::String(value.to_owned()) }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self { ConfigValue::String(value) }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self { ConfigValue::Integer(value) }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self { ConfigValue::Bool(value) }
}

/// A small ordered configuration overlay.
///
/// Scan jobs receive two of these at every chunk boundary: the job-level
/// overlay and the graph-wide overlay. Full configuration loading lives
/// outside this crate; this is just the typed map handed across the job
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl ScanConfig {
    /// Capacity of each per-query puller queue, and one factor of the shared
    /// row queue capacity.
    pub const PAGE_SIZE: &'static str = "scan.page-size";
    /// How long the merge loop waits on a live-but-silent puller before the
    /// scan is failed with a temporary storage error.
    pub const STALL_TIMEOUT_MS: &'static str = "scan.stall-timeout-ms";

    pub fn new() -> Self { Self::default() }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn has(&self, key: &str) -> bool { self.values.contains_key(key) }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ConfigValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn page_size(&self) -> usize {
        self.get_integer(Self::PAGE_SIZE).filter(|v| *v > 0).map(|v| v as usize).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn stall_timeout(&self) -> Duration {
        let ms = self.get_integer(Self::STALL_TIMEOUT_MS).filter(|v| *v > 0).map(|v| v as u64).unwrap_or(DEFAULT_STALL_TIMEOUT_MS);
        Duration::from_millis(ms)
    }
}

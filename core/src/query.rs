use std::fmt;
use std::sync::Arc;

/// An opaque, ordered byte key.
///
/// Keys are compared in plain lexicographic byte order, the same total order
/// every range query on a store iterates in. Clones are cheap (shared
/// allocation) because keys travel through queues and into per-query pending
/// buffers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Arc<[u8]>);

impl Key {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self { Key(bytes.into()) }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self { Key(bytes.into()) }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self { Key(bytes.into()) }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(0x")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// One column/value pair within a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub column: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(column: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Entry { column: column.into(), value: value.into() }
    }
}

pub type EntryList = Vec<Entry>;

/// An immutable column-range descriptor: start bound (inclusive), end bound
/// (exclusive, unless it is the all-ones upper bound), optional result limit.
///
/// A scan job declares an ordered, non-empty list of these. When more than
/// one is declared, the first (the grounding query) must cover the entire
/// column keyspace ([`RangeQuery::full_range`]); every other query's
/// contribution to a row is defined only relative to keys the grounding query
/// visits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeQuery {
    start: Vec<u8>,
    end: Vec<u8>,
    limit: Option<usize>,
}

impl RangeQuery {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        RangeQuery { start: start.into(), end: end.into(), limit: None }
    }

    /// The grounding query shape: all-zero start, all-one end.
    pub fn full_range() -> Self { RangeQuery::new(vec![0u8], vec![0xffu8]) }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(&self) -> &[u8] { &self.start }

    pub fn end(&self) -> &[u8] { &self.end }

    pub fn limit(&self) -> Option<usize> { self.limit }

    /// Whether this query spans the whole column keyspace: non-empty all-zero
    /// start bound and non-empty all-one end bound. Precondition for the
    /// grounding query whenever a job declares more than one query.
    pub fn covers_full_keyspace(&self) -> bool {
        !self.start.is_empty()
            && self.start.iter().all(|b| *b == 0)
            && !self.end.is_empty()
            && self.end.iter().all(|b| *b == 0xff)
    }

    fn unbounded_end(&self) -> bool { !self.end.is_empty() && self.end.iter().all(|b| *b == 0xff) }

    /// Column containment shared by all store backends: `start <= column`,
    /// and `column < end` except under the all-ones end bound, which admits
    /// everything above the start.
    pub fn contains_column(&self, column: &[u8]) -> bool {
        column >= self.start.as_slice() && (self.unbounded_end() || column < self.end.as_slice())
    }
}

use std::collections::HashMap;

use crate::query::{EntryList, Key, RangeQuery};

/// One joined row: a key plus each declared query's matched entries.
///
/// Built only by a collector, handed through the row queue to exactly one
/// processor, then dropped. A row is only ever emitted for a key the
/// grounding query matched; secondary queries may contribute empty lists.
#[derive(Debug)]
pub struct Row {
    key: Key,
    entries: HashMap<RangeQuery, EntryList>,
}

impl Row {
    pub(crate) fn new(key: Key, entries: HashMap<RangeQuery, EntryList>) -> Self { Row { key, entries } }

    pub fn key(&self) -> &Key { &self.key }

    pub fn entries(&self) -> &HashMap<RangeQuery, EntryList> { &self.entries }

    pub fn entries_for(&self, query: &RangeQuery) -> Option<&EntryList> { self.entries.get(query) }
}

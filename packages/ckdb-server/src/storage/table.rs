//! Generic temporal table: an ordered in-memory index with history
//! semantics.
//!
//! Each entity keeps its live rows in a [`TemporalTable`] keyed by the
//! entity's business key with expiry date descending as the final
//! component. Probing with the live-row sentinel finds the current
//! version exactly; range probes support "all rows for prefix" scans.
//!
//! Rows are never mutated in place: an update expires the old version in
//! the database and replaces the in-memory row atomically under the
//! table's write lock.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use parking_lot::RwLock;

/// A row type held by a [`TemporalTable`].
pub trait TableRow: Send + Sync + 'static {
    /// Total ordering key. By convention the final component is the
    /// expiry date wrapped in [`std::cmp::Reverse`], so the live row
    /// (maximum expiry) sorts first within its business-key prefix.
    type Key: Ord + Clone + Send + Sync;

    fn key(&self) -> Self::Key;
}

/// Ordered in-memory index over `Arc`-shared rows.
///
/// Concurrent readers, exclusive writers; iteration happens under a read
/// hold and is therefore stable.
pub struct TemporalTable<R: TableRow> {
    rows: RwLock<BTreeMap<R::Key, Arc<R>>>,
}

impl<R: TableRow> std::fmt::Debug for TemporalTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalTable")
            .field("len", &self.len())
            .finish()
    }
}

impl<R: TableRow> Default for TemporalTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: TableRow> TemporalTable<R> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Exact-key lookup. Build the probe with the live-row expiry
    /// sentinel to find the current version of a business key.
    #[must_use]
    pub fn find(&self, key: &R::Key) -> Option<Arc<R>> {
        self.rows.read().get(key).cloned()
    }

    /// Greatest row strictly before `key`.
    #[must_use]
    pub fn find_before(&self, key: &R::Key) -> Option<Arc<R>> {
        self.rows
            .read()
            .range(..key.clone())
            .next_back()
            .map(|(_, row)| Arc::clone(row))
    }

    /// Least row strictly after `key`.
    #[must_use]
    pub fn find_after(&self, key: &R::Key) -> Option<Arc<R>> {
        self.rows
            .read()
            .range((Excluded(key.clone()), Unbounded))
            .next()
            .map(|(_, row)| Arc::clone(row))
    }

    /// Collect rows strictly after `from` while `keep` holds, in key
    /// order. The scan happens under one read hold.
    #[must_use]
    pub fn collect_after<F>(&self, from: &R::Key, mut keep: F) -> Vec<Arc<R>>
    where
        F: FnMut(&R) -> bool,
    {
        self.rows
            .read()
            .range((Excluded(from.clone()), Unbounded))
            .take_while(|(_, row)| keep(row))
            .map(|(_, row)| Arc::clone(row))
            .collect()
    }

    /// Link a row into the index, returning the shared handle.
    pub fn insert(&self, row: R) -> Arc<R> {
        let row = Arc::new(row);
        self.rows.write().insert(row.key(), Arc::clone(&row));
        row
    }

    /// Remove the row at `key`.
    pub fn remove(&self, key: &R::Key) -> Option<Arc<R>> {
        self.rows.write().remove(key)
    }

    /// Replace the row at `old` with `new` under a single write hold,
    /// the in-memory half of a history-preserving update.
    pub fn expire_and_replace(&self, old: &R::Key, new: R) -> Arc<R> {
        let new = Arc::new(new);
        let mut rows = self.rows.write();
        rows.remove(old);
        rows.insert(new.key(), Arc::clone(&new));
        new
    }

    /// Drop every row (reload support).
    pub fn clear(&self) {
        self.rows.write().clear();
    }

    /// Number of rows held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Snapshot of every row in key order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<R>> {
        self.rows.read().values().map(Arc::clone).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;

    use ckdb_core::{Timestamp, DEFAULT_EXPIRY};

    use super::*;

    #[derive(Debug)]
    struct Row {
        name: String,
        expiry: Timestamp,
        value: i64,
    }

    impl TableRow for Row {
        type Key = (String, Reverse<Timestamp>);

        fn key(&self) -> Self::Key {
            (self.name.clone(), Reverse(self.expiry))
        }
    }

    fn live(name: &str, value: i64) -> Row {
        Row {
            name: name.to_string(),
            expiry: DEFAULT_EXPIRY,
            value,
        }
    }

    fn probe(name: &str) -> (String, Reverse<Timestamp>) {
        (name.to_string(), Reverse(DEFAULT_EXPIRY))
    }

    #[test]
    fn live_probe_finds_live_row_first() {
        let table = TemporalTable::new();
        table.insert(live("alice", 1));
        table.insert(Row {
            name: "alice".to_string(),
            expiry: Timestamp { sec: 100, usec: 0 },
            value: 0,
        });

        let found = table.find(&probe("alice")).unwrap();
        assert_eq!(found.value, 1);

        // The expired version sorts after the live one for the same name.
        let next = table.find_after(&probe("alice")).unwrap();
        assert_eq!(next.value, 0);
    }

    #[test]
    fn find_missing_returns_none() {
        let table: TemporalTable<Row> = TemporalTable::new();
        assert!(table.find(&probe("nobody")).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn find_before_and_after_bracket_key() {
        let table = TemporalTable::new();
        table.insert(live("b", 2));
        table.insert(live("d", 4));

        assert_eq!(table.find_before(&probe("c")).unwrap().value, 2);
        assert_eq!(table.find_after(&probe("c")).unwrap().value, 4);
        assert!(table.find_before(&probe("a")).is_none());
        assert!(table.find_after(&probe("e")).is_none());
    }

    #[test]
    fn collect_after_honours_predicate() {
        let table = TemporalTable::new();
        for (name, value) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            table.insert(live(name, value));
        }
        // Probe below "u1": gather while still in the u-prefix.
        let from = ("u0".to_string(), Reverse(DEFAULT_EXPIRY));
        let rows = table.collect_after(&from, |row| row.name.starts_with('u'));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, 1);
        assert_eq!(rows[2].value, 3);

        let rows = table.collect_after(&from, |row| row.name.as_str() < "u3");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn expire_and_replace_swaps_versions() {
        let table = TemporalTable::new();
        table.insert(live("alice", 1));

        let key = probe("alice");
        table.expire_and_replace(&key, live("alice", 2));

        assert_eq!(table.len(), 1);
        assert_eq!(table.find(&key).unwrap().value, 2);
    }

    #[test]
    fn at_most_one_live_row_per_key() {
        // Inserting the same business key twice while live overwrites in
        // place: the map cannot hold two rows with identical keys.
        let table = TemporalTable::new();
        table.insert(live("alice", 1));
        table.insert(live("alice", 2));
        assert_eq!(table.len(), 1);

        let live_rows: Vec<_> = table
            .snapshot()
            .into_iter()
            .filter(|row| row.expiry == DEFAULT_EXPIRY)
            .collect();
        assert_eq!(live_rows.len(), 1);
    }

    #[test]
    fn clear_empties_table() {
        let table = TemporalTable::new();
        table.insert(live("a", 1));
        table.insert(live("b", 2));
        assert_eq!(table.len(), 2);
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_readers_share_the_table() {
        let table = Arc::new(TemporalTable::new());
        table.insert(live("alice", 1));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    assert!(table.find(&probe("alice")).is_some());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

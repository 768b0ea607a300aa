//! LEVEE - MemTable (Multi-Version Sorted Map)
//! The in-memory home of every key. Each key keeps a short list of
//! versions tagged with the sequence number of the batch that wrote them,
//! so snapshots and cursors can read a stable point in time while newer
//! writes land.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::types::{Key, Value};

/// One version of a key. A `None` value is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub seq: u64,
    pub value: Option<Value>,
}

/// In-memory sorted key-value store backed by a BTreeMap.
pub struct MemTable {
    /// Versions per key, ascending by sequence number.
    entries: BTreeMap<Key, Vec<Version>>,
    /// Current approximate size in bytes.
    size_bytes: usize,
}

/// Newest value visible at `seq`, skipping keys whose visible version is a
/// tombstone.
fn visible(versions: &[Version], seq: u64) -> Option<&Value> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= seq)
        .and_then(|v| v.value.as_ref())
}

impl MemTable {
    /// Create a new, empty MemTable.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            size_bytes: 0,
        }
    }

    /// Returns the approximate size of the MemTable in bytes.
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    /// Returns the number of distinct keys held, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the MemTable holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a value for `key` at sequence `seq`.
    pub fn insert(&mut self, key: Key, seq: u64, value: Value) {
        self.apply(key, seq, Some(value));
    }

    /// Record a tombstone for `key` at sequence `seq`.
    pub fn delete(&mut self, key: Key, seq: u64) {
        self.apply(key, seq, None);
    }

    fn apply(&mut self, key: Key, seq: u64, value: Option<Value>) {
        let added = value.as_ref().map_or(0, |v| v.len());
        let key_len = key.len();
        let versions = self.entries.entry(key).or_default();
        if versions.is_empty() {
            self.size_bytes += key_len;
        }
        match versions.last_mut() {
            // Same batch wrote the key twice: the later op wins.
            Some(last) if last.seq == seq => {
                let old = last.value.as_ref().map_or(0, |v| v.len());
                self.size_bytes = self.size_bytes.saturating_sub(old);
                last.value = value;
            }
            _ => {
                debug_assert!(versions.last().map_or(true, |v| v.seq < seq));
                versions.push(Version { seq, value });
            }
        }
        self.size_bytes += added;
    }

    /// Get the value of `key` as of sequence `seq`.
    /// Returns `None` if the key is absent or deleted at that point.
    pub fn get(&self, key: &[u8], seq: u64) -> Option<&Value> {
        self.entries.get(key).and_then(|versions| visible(versions, seq))
    }

    /// First live entry at or after `target`.
    pub fn seek(&self, target: &[u8], seq: u64) -> Option<(&Key, &Value)> {
        self.scan_forward((Bound::Included(target), Bound::Unbounded), seq)
    }

    /// First live entry strictly after `key`.
    pub fn next_after(&self, key: &[u8], seq: u64) -> Option<(&Key, &Value)> {
        self.scan_forward((Bound::Excluded(key), Bound::Unbounded), seq)
    }

    /// Last live entry strictly before `key`.
    pub fn prev_before(&self, key: &[u8], seq: u64) -> Option<(&Key, &Value)> {
        self.scan_backward((Bound::Unbounded, Bound::Excluded(key)), seq)
    }

    pub fn first(&self, seq: u64) -> Option<(&Key, &Value)> {
        self.scan_forward((Bound::Unbounded, Bound::Unbounded), seq)
    }

    pub fn last(&self, seq: u64) -> Option<(&Key, &Value)> {
        self.scan_backward((Bound::Unbounded, Bound::Unbounded), seq)
    }

    fn scan_forward(&self, range: (Bound<&[u8]>, Bound<&[u8]>), seq: u64) -> Option<(&Key, &Value)> {
        self.entries
            .range::<[u8], _>(range)
            .find_map(|(k, versions)| visible(versions, seq).map(|v| (k, v)))
    }

    fn scan_backward(&self, range: (Bound<&[u8]>, Bound<&[u8]>), seq: u64) -> Option<(&Key, &Value)> {
        self.entries
            .range::<[u8], _>(range)
            .rev()
            .find_map(|(k, versions)| visible(versions, seq).map(|v| (k, v)))
    }

    /// Drop versions of `key` that no reader at or above `horizon` can see.
    /// Keeps every version newer than `horizon` plus the newest one at or
    /// below it; a key left with only an old tombstone is removed outright.
    pub fn prune(&mut self, key: &[u8], horizon: u64) {
        let Some(versions) = self.entries.get_mut(key) else {
            return;
        };
        let keep_from = versions
            .iter()
            .rposition(|v| v.seq <= horizon)
            .unwrap_or(0);
        for dropped in versions.drain(..keep_from) {
            let len = dropped.value.as_ref().map_or(0, |v| v.len());
            self.size_bytes = self.size_bytes.saturating_sub(len);
        }
        let dead = versions.len() == 1 && versions[0].value.is_none() && versions[0].seq <= horizon;
        if dead {
            self.size_bytes = self.size_bytes.saturating_sub(key.len());
            self.entries.remove(key);
        }
    }

    /// Prune every key against `horizon`.
    pub fn prune_all(&mut self, horizon: u64) {
        let keys: Vec<Key> = self.entries.keys().cloned().collect();
        for key in keys {
            self.prune(&key, horizon);
        }
    }

    /// Number of keys live at `seq`.
    pub fn live_len(&self, seq: u64) -> usize {
        self.entries
            .values()
            .filter(|versions| visible(versions, seq).is_some())
            .count()
    }

    /// Every entry live at `seq`, in key order.
    pub fn live_entries(&self, seq: u64) -> Vec<(Key, Value)> {
        self.entries
            .iter()
            .filter_map(|(k, versions)| visible(versions, seq).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Bytes of live key + value data in `[start, limit)` at `seq`.
    pub fn range_size(&self, start: &[u8], limit: &[u8], seq: u64) -> u64 {
        if start >= limit {
            return 0;
        }
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(limit)))
            .filter_map(|(k, versions)| visible(versions, seq).map(|v| (k.len() + v.len()) as u64))
            .sum()
    }

    /// Clear all entries from the MemTable and reset size.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_insert_and_get() {
        let mut table = MemTable::new();
        table.insert(b("key1"), 1, b("value1"));
        assert_eq!(table.get(b"key1", 1), Some(&b("value1")));
    }

    #[test]
    fn test_get_nonexistent() {
        let table = MemTable::new();
        assert_eq!(table.get(b"missing", 10), None);
    }

    #[test]
    fn test_versions_are_isolated_by_sequence() {
        let mut table = MemTable::new();
        table.insert(b("key"), 1, b("old"));
        table.insert(b("key"), 2, b("new"));
        assert_eq!(table.get(b"key", 1), Some(&b("old")));
        assert_eq!(table.get(b"key", 2), Some(&b("new")));
        assert_eq!(table.get(b"key", 0), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_same_sequence_later_op_wins() {
        let mut table = MemTable::new();
        table.insert(b("k1"), 3, b("v1"));
        table.insert(b("k1"), 3, b("v2"));
        assert_eq!(table.get(b"k1", 3), Some(&b("v2")));
        assert_eq!(table.size(), 4);
    }

    #[test]
    fn test_delete_tombstone() {
        let mut table = MemTable::new();
        table.insert(b("key"), 1, b("value"));
        table.delete(b("key"), 2);
        assert_eq!(table.get(b"key", 2), None);
        assert_eq!(table.get(b"key", 1), Some(&b("value")));
        assert_eq!(table.live_len(2), 0);
    }

    #[test]
    fn test_navigation_skips_tombstones() {
        let mut table = MemTable::new();
        table.insert(b("a"), 1, b("1"));
        table.insert(b("b"), 1, b("2"));
        table.insert(b("c"), 1, b("3"));
        table.delete(b("b"), 2);

        assert_eq!(table.first(2).map(|(k, _)| k.clone()), Some(b("a")));
        assert_eq!(table.next_after(b"a", 2).map(|(k, _)| k.clone()), Some(b("c")));
        assert_eq!(table.next_after(b"a", 1).map(|(k, _)| k.clone()), Some(b("b")));
        assert_eq!(table.prev_before(b"c", 2).map(|(k, _)| k.clone()), Some(b("a")));
        assert_eq!(table.last(2).map(|(k, _)| k.clone()), Some(b("c")));
        assert_eq!(table.seek(b"bb", 2).map(|(k, _)| k.clone()), Some(b("c")));
        assert!(table.next_after(b"c", 2).is_none());
    }

    #[test]
    fn test_prune_keeps_visible_history() {
        let mut table = MemTable::new();
        table.insert(b("key"), 1, b("one"));
        table.insert(b("key"), 2, b("two"));
        table.insert(b("key"), 3, b("three"));

        table.prune(b"key", 2);
        assert_eq!(table.get(b"key", 2), Some(&b("two")));
        assert_eq!(table.get(b"key", 1), None);
        assert_eq!(table.get(b"key", 3), Some(&b("three")));
        assert_eq!(table.size(), 3 + 3 + 5);
    }

    #[test]
    fn test_prune_removes_dead_tombstones() {
        let mut table = MemTable::new();
        table.insert(b("gone"), 1, b("x"));
        table.delete(b("gone"), 2);
        table.prune(b"gone", 2);
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_size_tracking() {
        let mut table = MemTable::new();
        assert_eq!(table.size(), 0);
        table.insert(b("abc"), 1, b("12345")); // 3 + 5 = 8
        assert_eq!(table.size(), 8);
        assert_eq!(table.range_size(b"a", b"b", 1), 8);
        assert_eq!(table.range_size(b"b", b"z", 1), 0);
        assert_eq!(table.range_size(b"z", b"a", 1), 0);
    }

    #[test]
    fn test_clear() {
        let mut table = MemTable::new();
        table.insert(b("k1"), 1, b("v1"));
        table.insert(b("k2"), 1, b("v2"));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }
}

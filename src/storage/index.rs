use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Position of a row version inside a catalog heap
pub type RowId = u64;

/// Point lookups and maintenance over a catalog key
pub trait Index<K: Ord + Clone> {
    fn insert(&mut self, key: K, row: RowId);

    fn remove(&mut self, key: &K, row: RowId);

    /// Every row version filed under `key`
    fn search(&self, key: &K) -> Vec<RowId>;
}

/// Indexes that can answer ordered range queries
pub trait OrderedIndex<K: Ord + Clone>: Index<K> {
    /// Entries with keys in `range`, ascending
    fn range_scan(&self, range: RangeInclusive<K>) -> Vec<(K, RowId)>;

    /// Entries with keys in `range`, descending. The first element is the
    /// largest key not above the upper bound.
    fn range_scan_back(&self, range: RangeInclusive<K>) -> Vec<(K, RowId)>;

    /// Every entry, ascending
    fn full_scan(&self) -> Vec<(K, RowId)>;
}

/// In-memory ordered index; row versions of equal keys keep insertion order
#[derive(Debug, Clone)]
pub struct BTreeIndex<K> {
    map: BTreeMap<K, Vec<RowId>>,
}

impl<K: Ord + Clone> BTreeIndex<K> {
    pub fn new() -> Self {
        BTreeIndex { map: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Lazy form of `range_scan`
    pub fn iter_range(&self, range: RangeInclusive<K>) -> impl Iterator<Item = (&K, RowId)> + '_ {
        self.map
            .range(range)
            .flat_map(|(k, rows)| rows.iter().map(move |r| (k, *r)))
    }

    /// Lazy form of `range_scan_back`; newest version of a key first
    pub fn iter_range_back(&self, range: RangeInclusive<K>) -> impl Iterator<Item = (&K, RowId)> + '_ {
        self.map
            .range(range)
            .rev()
            .flat_map(|(k, rows)| rows.iter().rev().map(move |r| (k, *r)))
    }
}

impl<K: Ord + Clone> Default for BTreeIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Index<K> for BTreeIndex<K> {
    fn insert(&mut self, key: K, row: RowId) {
        self.map.entry(key).or_default().push(row);
    }

    fn remove(&mut self, key: &K, row: RowId) {
        if let Some(rows) = self.map.get_mut(key) {
            rows.retain(|r| *r != row);
            if rows.is_empty() {
                self.map.remove(key);
            }
        }
    }

    fn search(&self, key: &K) -> Vec<RowId> {
        self.map.get(key).cloned().unwrap_or_default()
    }
}

impl<K: Ord + Clone> OrderedIndex<K> for BTreeIndex<K> {
    fn range_scan(&self, range: RangeInclusive<K>) -> Vec<(K, RowId)> {
        self.iter_range(range).map(|(k, r)| (k.clone(), r)).collect()
    }

    fn range_scan_back(&self, range: RangeInclusive<K>) -> Vec<(K, RowId)> {
        self.iter_range_back(range).map(|(k, r)| (k.clone(), r)).collect()
    }

    fn full_scan(&self) -> Vec<(K, RowId)> {
        self.map
            .iter()
            .flat_map(|(k, rows)| rows.iter().map(move |r| (k.clone(), *r)))
            .collect()
    }
}

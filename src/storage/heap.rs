use std::ops::RangeInclusive;

use crate::error::{Error, Result};
use crate::storage::index::{BTreeIndex, Index, OrderedIndex, RowId};
use crate::txn::{FROZEN_XID, RowStamp, Snapshot, Transaction, TransactionManager, XactStatus};
use crate::types::Xid;

/// A row type stored in a catalog heap
pub trait CatalogRow: Clone {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
}

#[derive(Debug, Clone)]
pub struct HeapTuple<R> {
    pub stamp: RowStamp,
    pub data: R,
}

/// Multi-version row store with one ordered index.
///
/// Updates never overwrite: the old version gets an xmax stamp and the new
/// version a fresh row id. Visibility is decided per snapshot at scan time.
pub struct CatalogHeap<R: CatalogRow> {
    name: &'static str,
    tuples: Vec<Option<HeapTuple<R>>>,
    index: BTreeIndex<R::Key>,
}

impl<R: CatalogRow> CatalogHeap<R> {
    pub fn new(name: &'static str) -> Self {
        CatalogHeap {
            name,
            tuples: Vec::new(),
            index: BTreeIndex::new(),
        }
    }

    /// Rebuild from checkpointed rows; every row comes back frozen
    pub fn from_rows(name: &'static str, rows: Vec<R>) -> Self {
        let mut heap = Self::new(name);
        for row in rows {
            heap.insert_frozen(row);
        }
        heap
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn push(&mut self, stamp: RowStamp, data: R) -> RowId {
        let id = self.tuples.len() as RowId;
        self.index.insert(data.key(), id);
        self.tuples.push(Some(HeapTuple { stamp, data }));
        id
    }

    pub fn insert(&mut self, data: R, txn: &Transaction) -> RowId {
        self.push(RowStamp::inserted_by(txn.xid(), txn.command_id()), data)
    }

    /// Insert a row every snapshot sees at once and no abort takes back
    pub fn insert_frozen(&mut self, data: R) -> RowId {
        self.push(RowStamp::frozen(), data)
    }

    pub fn fetch(&self, id: RowId) -> Option<&HeapTuple<R>> {
        self.tuples.get(id as usize).and_then(Option::as_ref)
    }

    /// Stamp the version at `id` as deleted by `txn`
    pub fn delete(&mut self, id: RowId, txn: &Transaction, mgr: &TransactionManager) -> Result<()> {
        let name = self.name;
        let tuple = self
            .tuples
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Conflict(format!("{}: row {} does not exist", name, id)))?;

        if tuple.stamp.xmin == txn.xid() && tuple.stamp.cmin >= txn.command_id() {
            return Err(Error::Conflict(format!(
                "{}: row {} was written by the current command",
                name, id
            )));
        }
        if let Some((xmax, _)) = tuple.stamp.xmax {
            let gone = xmax == txn.xid() || mgr.status(xmax) != XactStatus::Aborted;
            if gone {
                return Err(Error::Conflict(format!(
                    "{}: row {} already updated by transaction {}",
                    name, id, xmax
                )));
            }
        }
        tuple.stamp.xmax = Some((txn.xid(), txn.command_id()));
        Ok(())
    }

    /// Replace the version at `id` with `data`; returns the new row id
    pub fn update(
        &mut self,
        id: RowId,
        data: R,
        txn: &Transaction,
        mgr: &TransactionManager,
    ) -> Result<RowId> {
        self.delete(id, txn, mgr)?;
        Ok(self.insert(data, txn))
    }

    /// Visible versions with keys in `range`, ascending
    pub fn scan(
        &self,
        range: RangeInclusive<R::Key>,
        snapshot: &Snapshot,
        mgr: &TransactionManager,
    ) -> Vec<(RowId, R)> {
        self.visible(self.index.range_scan(range), snapshot, mgr)
    }

    /// Visible versions in backward order, checked one at a time as the
    /// iterator is advanced
    pub fn visible_back<'s>(
        &'s self,
        range: RangeInclusive<R::Key>,
        snapshot: &'s Snapshot,
        mgr: &'s TransactionManager,
    ) -> impl Iterator<Item = (RowId, &'s R)> + 's {
        self.index
            .iter_range_back(range)
            .filter_map(move |(_, id)| self.visible_ref(id, snapshot, mgr))
    }

    /// First visible version in backward order
    pub fn last_visible(
        &self,
        range: RangeInclusive<R::Key>,
        snapshot: &Snapshot,
        mgr: &TransactionManager,
    ) -> Option<(RowId, R)> {
        self.visible_back(range, snapshot, mgr)
            .next()
            .map(|(id, data)| (id, data.clone()))
    }

    /// First visible version in forward order
    pub fn first_visible(
        &self,
        range: RangeInclusive<R::Key>,
        snapshot: &Snapshot,
        mgr: &TransactionManager,
    ) -> Option<(RowId, R)> {
        self.index
            .iter_range(range)
            .find_map(|(_, id)| self.visible_ref(id, snapshot, mgr))
            .map(|(id, data)| (id, data.clone()))
    }

    /// Every visible version in key order
    pub fn scan_all(&self, snapshot: &Snapshot, mgr: &TransactionManager) -> Vec<(RowId, R)> {
        self.visible(self.index.full_scan(), snapshot, mgr)
    }

    /// Rows a checkpoint keeps: committed inserts not deleted by a committed
    /// transaction. In-flight changes are left out.
    pub fn committed_rows(&self, mgr: &TransactionManager) -> Vec<R> {
        self.index
            .full_scan()
            .into_iter()
            .filter_map(|(_, id)| self.fetch(id))
            .filter(|tuple| {
                let inserted = mgr.status(tuple.stamp.xmin) == XactStatus::Committed;
                let deleted = tuple
                    .stamp
                    .xmax
                    .is_some_and(|(xmax, _)| mgr.status(xmax) == XactStatus::Committed);
                inserted && !deleted
            })
            .map(|tuple| tuple.data.clone())
            .collect()
    }

    /// Physically remove every version whose row matches `pred`. Not
    /// transactional; used when a whole relation goes away.
    pub fn purge<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&R) -> bool,
    {
        self.remove_where(|tuple| pred(&tuple.data))
    }

    /// Physically remove versions no running transaction can see again:
    /// inserts of aborted transactions, and versions deleted by a
    /// transaction that committed before the oldest running snapshot.
    /// Returns the number of versions removed.
    pub fn prune(&mut self, mgr: &TransactionManager) -> usize {
        let horizon = mgr.oldest_xmin();
        self.remove_where(|tuple| is_dead(&tuple.stamp, horizon, mgr))
    }

    fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&HeapTuple<R>) -> bool,
    {
        let mut removed = 0;
        for (id, slot) in self.tuples.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(&mut pred) {
                if let Some(tuple) = slot.take() {
                    self.index.remove(&tuple.data.key(), id as RowId);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Number of row versions held, dead ones included
    pub fn version_count(&self) -> usize {
        self.tuples.iter().filter(|t| t.is_some()).count()
    }

    fn visible_ref(&self, id: RowId, snapshot: &Snapshot, mgr: &TransactionManager) -> Option<(RowId, &R)> {
        self.fetch(id)
            .filter(|tuple| snapshot.is_visible(&tuple.stamp, mgr))
            .map(|tuple| (id, &tuple.data))
    }

    fn visible(
        &self,
        hits: Vec<(R::Key, RowId)>,
        snapshot: &Snapshot,
        mgr: &TransactionManager,
    ) -> Vec<(RowId, R)> {
        hits.into_iter()
            .filter_map(|(_, id)| self.visible_ref(id, snapshot, mgr))
            .map(|(id, data)| (id, data.clone()))
            .collect()
    }
}

fn is_dead(stamp: &RowStamp, horizon: Xid, mgr: &TransactionManager) -> bool {
    if stamp.xmin != FROZEN_XID && mgr.status(stamp.xmin) == XactStatus::Aborted {
        return true;
    }
    stamp
        .xmax
        .is_some_and(|(xmax, _)| xmax < horizon && mgr.status(xmax) == XactStatus::Committed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        k: i32,
        v: &'static str,
    }

    impl CatalogRow for Row {
        type Key = i32;
        fn key(&self) -> i32 {
            self.k
        }
    }

    #[test]
    fn update_creates_new_version() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");

        let t1 = mgr.begin();
        let id = heap.insert(Row { k: 1, v: "a" }, &t1);
        t1.command_counter_increment();
        let new_id = heap.update(id, Row { k: 1, v: "b" }, &t1, &mgr).unwrap();
        assert_ne!(id, new_id);

        let t2 = mgr.begin();
        assert!(heap.scan(0..=10, &t2.snapshot(), &mgr).is_empty());
        t1.commit();
        let rows = heap.scan(0..=10, &t2.snapshot(), &mgr);
        assert_eq!(rows, vec![(new_id, Row { k: 1, v: "b" })]);
        assert_eq!(heap.scan_all(&Snapshot::Any, &mgr).len(), 2);
    }

    #[test]
    fn same_command_update_is_rejected() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        let t1 = mgr.begin();
        let id = heap.insert(Row { k: 1, v: "a" }, &t1);
        let err = heap.update(id, Row { k: 1, v: "b" }, &t1, &mgr).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn committed_rows_skip_aborted_work() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        heap.insert_frozen(Row { k: 1, v: "frozen" });

        let t1 = mgr.begin();
        heap.insert(Row { k: 2, v: "aborted" }, &t1);
        t1.abort();

        let t2 = mgr.begin();
        heap.insert(Row { k: 3, v: "running" }, &t2);

        let rows = heap.committed_rows(&mgr);
        assert_eq!(rows, vec![Row { k: 1, v: "frozen" }]);
    }

    #[test]
    fn last_visible_skips_invisible_versions() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        heap.insert_frozen(Row { k: 1, v: "old" });
        let writer = mgr.begin();
        heap.insert(Row { k: 5, v: "new" }, &writer);

        let reader = mgr.begin();
        let (_, row) = heap.last_visible(0..=9, &reader.snapshot(), &mgr).unwrap();
        assert_eq!(row.v, "old");
    }

    #[test]
    fn prune_keeps_versions_an_open_snapshot_still_sees() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        let first = heap.insert_frozen(Row { k: 1, v: "a" });

        let reader = mgr.begin();
        let snapshot = reader.snapshot();
        let writer = mgr.begin();
        heap.update(first, Row { k: 1, v: "b" }, &writer, &mgr).unwrap();
        writer.commit();

        let loser = mgr.begin();
        heap.insert(Row { k: 2, v: "lost" }, &loser);
        loser.abort();

        assert_eq!(heap.prune(&mgr), 1);
        assert_eq!(heap.last_visible(0..=9, &snapshot, &mgr).unwrap().1.v, "a");

        reader.commit();
        assert_eq!(heap.prune(&mgr), 1);
        assert_eq!(heap.version_count(), 1);
        let now = mgr.begin();
        assert_eq!(heap.scan_all(&now.snapshot(), &mgr), vec![(1, Row { k: 1, v: "b" })]);
    }

    #[test]
    fn visible_back_stops_at_first_match() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        heap.insert_frozen(Row { k: 1, v: "one" });
        heap.insert_frozen(Row { k: 4, v: "four" });
        heap.insert_frozen(Row { k: 7, v: "seven" });

        let txn = mgr.begin();
        let snapshot = txn.snapshot();
        let mut back = heap.visible_back(0..=5, &snapshot, &mgr);
        assert_eq!(back.next().map(|(_, r)| r.v), Some("four"));
        assert_eq!(back.next().map(|(_, r)| r.v), Some("one"));
        assert!(back.next().is_none());
        assert_eq!(heap.first_visible(2..=9, &snapshot, &mgr).unwrap().1.v, "four");
    }

    #[test]
    fn purge_drops_every_matching_version() {
        let mgr = TransactionManager::new();
        let mut heap = CatalogHeap::new("test");
        heap.insert_frozen(Row { k: 1, v: "a" });
        heap.insert_frozen(Row { k: 2, v: "b" });
        heap.insert_frozen(Row { k: 3, v: "a" });

        assert_eq!(heap.purge(|row| row.v == "a"), 2);
        assert_eq!(heap.version_count(), 1);
        assert_eq!(heap.scan_all(&Snapshot::Any, &mgr), vec![(1, Row { k: 2, v: "b" })]);
    }
}

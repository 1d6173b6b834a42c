//! Per-segment metadata: end of file, tuple and block counts, modification
//! count, format version and compaction state.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::catalog::{AoRelation, Catalog};
use crate::storage::heap::CatalogRow;
use crate::storage::index::RowId;
use crate::txn::{Snapshot, Transaction, TransactionManager};
use crate::types::{FORMAT_VERSION_LATEST, MAX_SEGNO, RelId, SegNo, SegmentState};

/// End of file of one column's segment file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ColumnEof {
    pub eof: i64,
    pub eof_uncompressed: i64,
}

/// Catalog row describing one segment. `modcount` and `state` are absent
/// on rows written by old catalog versions.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SegFileRow {
    pub relid: RelId,
    pub segno: SegNo,
    pub eof: i64,
    pub eof_uncompressed: i64,
    pub tupcount: i64,
    pub varblockcount: i64,
    pub modcount: Option<i64>,
    pub formatversion: i16,
    pub state: Option<SegmentState>,
    /// Per-column EOFs; empty for row-oriented relations
    pub columns: Vec<ColumnEof>,
}

impl CatalogRow for SegFileRow {
    type Key = (RelId, SegNo);

    fn key(&self) -> Self::Key {
        (self.relid, self.segno)
    }
}

/// Segment metadata as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFileInfo {
    pub segno: SegNo,
    pub eof: i64,
    pub eof_uncompressed: i64,
    pub total_tupcount: i64,
    pub varblockcount: i64,
    pub modcount: i64,
    pub formatversion: i16,
    pub state: SegmentState,
    pub columns: Vec<ColumnEof>,
}

impl SegmentFileInfo {
    /// EOF of the file backing `column_group`
    pub fn eof_for(&self, column_group: usize) -> i64 {
        if self.columns.is_empty() {
            self.eof
        } else {
            self.columns.get(column_group).map(|c| c.eof).unwrap_or(0)
        }
    }

    pub fn eof_uncompressed_for(&self, column_group: usize) -> i64 {
        if self.columns.is_empty() {
            self.eof_uncompressed
        } else {
            self.columns.get(column_group).map(|c| c.eof_uncompressed).unwrap_or(0)
        }
    }

    pub fn is_awaiting_drop(&self) -> bool {
        self.state == SegmentState::AwaitingDrop
    }
}

/// Aggregate over all segments of a relation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSegTotals {
    pub total_bytes: i64,
    pub total_bytes_uncompressed: i64,
    /// Tuples in segments not awaiting drop
    pub total_tuples: i64,
    pub total_varblocks: i64,
    pub total_filesegs: i64,
    pub modcount: i64,
}

/// Segment catalog operations for one relation
pub struct SegmentFileCatalog<'a> {
    catalog: &'a Catalog,
    mgr: &'a TransactionManager,
    rel: &'a AoRelation,
}

impl<'a> SegmentFileCatalog<'a> {
    pub fn new(catalog: &'a Catalog, mgr: &'a TransactionManager, rel: &'a AoRelation) -> Self {
        SegmentFileCatalog { catalog, mgr, rel }
    }

    fn corruption(&self, segno: SegNo, detail: impl Into<String>) -> Error {
        Error::corruption(&self.rel.name, segno, None, detail)
    }

    fn require_lock(&self, txn: &Transaction, segno: SegNo, op: &str) -> Result<()> {
        if !self.mgr.locks().is_held_by(self.rel.relid, segno, txn.xid()) {
            return Err(Error::Configuration(format!(
                "{} on relation \"{}\" segno {} requires the segment lock",
                op, self.rel.name, segno
            )));
        }
        Ok(())
    }

    fn to_info(&self, row: &SegFileRow) -> Result<SegmentFileInfo> {
        let modcount = row
            .modcount
            .ok_or_else(|| self.corruption(row.segno, "modcount is missing"))?;
        let state = row
            .state
            .ok_or_else(|| self.corruption(row.segno, "state is missing"))?;
        Ok(build_info(row, modcount, state))
    }

    /// The single visible row for `segno`
    fn find_row(&self, snapshot: &Snapshot, segno: SegNo) -> Result<Option<(RowId, SegFileRow)>> {
        let key = (self.rel.relid, segno);
        let mut rows = self.catalog.segfiles.read().scan(key..=key, snapshot, self.mgr);
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(self.corruption(segno, format!("found {} catalog rows for one segment", n))),
        }
    }

    /// Create the zeroed row for `segno`, visible to every snapshot at once,
    /// and take the segment lock for `txn`.
    pub fn insert(&self, txn: &Transaction, segno: SegNo) -> Result<()> {
        if !(0..=MAX_SEGNO).contains(&segno) {
            return Err(Error::Configuration(format!(
                "segno {} out of range for relation \"{}\"",
                segno, self.rel.name
            )));
        }
        self.mgr.locks().lock_segment(txn.xid(), self.rel.relid, segno);

        let mut heap = self.catalog.segfiles.write();
        let key = (self.rel.relid, segno);
        if !heap.scan(key..=key, &Snapshot::SelfVisible { xid: txn.xid() }, self.mgr).is_empty() {
            return Err(self.corruption(segno, "segment row already exists"));
        }
        let columns = if self.rel.is_column_oriented() {
            vec![ColumnEof::default(); self.rel.num_columns as usize]
        } else {
            Vec::new()
        };
        heap.insert_frozen(SegFileRow {
            relid: self.rel.relid,
            segno,
            eof: 0,
            eof_uncompressed: 0,
            tupcount: 0,
            varblockcount: 0,
            modcount: Some(0),
            formatversion: FORMAT_VERSION_LATEST,
            state: Some(SegmentState::Default),
            columns,
        });
        debug!(relid = self.rel.relid, segno, "segment row created");
        Ok(())
    }

    /// Look up one segment. With `locked` the row must exist and the caller
    /// must hold its lock; without it a missing row is `None`.
    pub fn get_info(
        &self,
        txn: &Transaction,
        snapshot: &Snapshot,
        segno: SegNo,
        locked: bool,
    ) -> Result<Option<SegmentFileInfo>> {
        if locked {
            self.require_lock(txn, segno, "locked segment lookup")?;
        }
        match self.find_row(snapshot, segno)? {
            Some((_, row)) => Ok(Some(self.to_info(&row)?)),
            None if locked => Err(self.corruption(segno, "locked segment row not found")),
            None => Ok(None),
        }
    }

    /// Every visible segment, ordered by segno
    pub fn get_all(&self, snapshot: &Snapshot) -> Result<Vec<SegmentFileInfo>> {
        let relid = self.rel.relid;
        let rows = self.catalog.segfiles.read().scan((relid, 0)..=(relid, MAX_SEGNO), snapshot, self.mgr);
        let mut infos = Vec::with_capacity(rows.len());
        for (_, row) in &rows {
            if infos.last().is_some_and(|prev: &SegmentFileInfo| prev.segno == row.segno) {
                return Err(self.corruption(row.segno, "found two catalog rows for one segment"));
            }
            infos.push(self.to_info(row)?);
        }
        Ok(infos)
    }

    /// Every row version ever written, oldest first per segno. Legacy rows
    /// read as modcount 0 and state DEFAULT.
    pub fn get_all_history(&self) -> Vec<SegmentFileInfo> {
        let relid = self.rel.relid;
        self.catalog
            .segfiles
            .read()
            .scan((relid, 0)..=(relid, MAX_SEGNO), &Snapshot::Any, self.mgr)
            .iter()
            .map(|(_, row)| {
                build_info(
                    row,
                    row.modcount.unwrap_or(0),
                    row.state.unwrap_or(SegmentState::Default),
                )
            })
            .collect()
    }

    fn modify<F>(&self, txn: &Transaction, segno: SegNo, op: &str, f: F) -> Result<SegFileRow>
    where
        F: FnOnce(&mut SegFileRow) -> Result<()>,
    {
        self.require_lock(txn, segno, op)?;
        let snapshot = txn.self_snapshot();
        let mut heap = self.catalog.segfiles.write();

        let key = (self.rel.relid, segno);
        let mut rows = heap.scan(key..=key, &snapshot, self.mgr);
        let (id, mut row) = match rows.len() {
            0 => return Err(self.corruption(segno, format!("{}: segment row not found", op))),
            1 => rows.remove(0),
            n => return Err(self.corruption(segno, format!("{}: found {} rows for one segment", op, n))),
        };
        if row.modcount.is_none() || row.state.is_none() {
            return Err(self.corruption(segno, format!("{}: legacy row cannot be modified", op)));
        }
        f(&mut row)?;
        heap.update(id, row.clone(), txn, self.mgr)?;
        drop(heap);
        // each catalog change is its own command
        txn.command_counter_increment();
        Ok(row)
    }

    /// Add to the tuple, block and modification counts
    pub fn add_count(
        &self,
        txn: &Transaction,
        segno: SegNo,
        tuples_added: i64,
        varblocks_added: i64,
        modcount_added: i64,
    ) -> Result<()> {
        let row = self.modify(txn, segno, "add count", |row| {
            row.tupcount += tuples_added;
            row.varblockcount += varblocks_added;
            row.modcount = row.modcount.map(|m| m + modcount_added);
            Ok(())
        })?;
        debug!(
            relid = self.rel.relid,
            segno,
            tupcount = row.tupcount,
            varblockcount = row.varblockcount,
            "segment counts updated"
        );
        Ok(())
    }

    /// Record new EOFs and counts after an insert session. EOFs may only
    /// grow; `eofs` holds one entry per column group.
    pub fn update(
        &self,
        txn: &Transaction,
        segno: SegNo,
        eofs: &[ColumnEof],
        tuples_added: i64,
        varblocks_added: i64,
        modcount_added: i64,
    ) -> Result<()> {
        let groups = self.rel.num_column_groups();
        if eofs.len() != groups {
            return Err(Error::Configuration(format!(
                "relation \"{}\" has {} column groups, got {} eofs",
                self.rel.name,
                groups,
                eofs.len()
            )));
        }
        let name = self.rel.name.clone();
        let column_oriented = self.rel.is_column_oriented();

        let row = self.modify(txn, segno, "update", |row| {
            let old: Vec<ColumnEof> = if column_oriented {
                row.columns.clone()
            } else {
                vec![ColumnEof { eof: row.eof, eof_uncompressed: row.eof_uncompressed }]
            };
            for (column, (new, old)) in eofs.iter().zip(old.iter()).enumerate() {
                if new.eof < old.eof {
                    return Err(Error::corruption(
                        &name,
                        segno,
                        None,
                        format!(
                            "eof of column {} would move backwards from {} to {}",
                            column, old.eof, new.eof
                        ),
                    ));
                }
            }
            if column_oriented {
                row.columns = eofs.to_vec();
                row.eof = eofs.iter().map(|c| c.eof).sum();
                row.eof_uncompressed = eofs.iter().map(|c| c.eof_uncompressed).sum();
            } else {
                row.eof = eofs[0].eof;
                row.eof_uncompressed = eofs[0].eof_uncompressed;
            }
            row.tupcount += tuples_added;
            row.varblockcount += varblocks_added;
            row.modcount = row.modcount.map(|m| m + modcount_added);
            Ok(())
        })?;
        debug!(relid = self.rel.relid, segno, eof = row.eof, tupcount = row.tupcount, "segment updated");
        Ok(())
    }

    /// DEFAULT -> AWAITING_DROP
    pub fn mark_awaiting_drop(&self, txn: &Transaction, segno: SegNo) -> Result<()> {
        let name = self.rel.name.clone();
        self.modify(txn, segno, "mark awaiting drop", |row| {
            if row.state == Some(SegmentState::AwaitingDrop) {
                return Err(Error::corruption(
                    &name,
                    segno,
                    None,
                    "segment is already AWAITING_DROP",
                ));
            }
            row.state = Some(SegmentState::AwaitingDrop);
            Ok(())
        })?;
        debug!(relid = self.rel.relid, segno, "segment awaiting drop");
        Ok(())
    }

    /// Reset a segment for reuse: zero counts and EOFs, latest format,
    /// DEFAULT state. The modification count is kept.
    pub fn clear(&self, txn: &Transaction, segno: SegNo) -> Result<()> {
        self.modify(txn, segno, "clear", |row| {
            row.eof = 0;
            row.eof_uncompressed = 0;
            row.tupcount = 0;
            row.varblockcount = 0;
            row.formatversion = FORMAT_VERSION_LATEST;
            row.state = Some(SegmentState::Default);
            row.columns.iter_mut().for_each(|c| *c = ColumnEof::default());
            Ok(())
        })?;
        debug!(relid = self.rel.relid, segno, "segment cleared");
        Ok(())
    }

    /// Sum over all segments. Bytes count every segment, tuples only those
    /// not awaiting drop. `projection` limits which columns contribute bytes.
    pub fn totals(&self, snapshot: &Snapshot, projection: Option<&[usize]>) -> Result<FileSegTotals> {
        let mut totals = FileSegTotals::default();
        for info in self.get_all(snapshot)? {
            if info.columns.is_empty() {
                totals.total_bytes += info.eof;
                totals.total_bytes_uncompressed += info.eof_uncompressed;
            } else {
                for (column, eofs) in info.columns.iter().enumerate() {
                    if projection.is_none_or(|p| p.contains(&column)) {
                        totals.total_bytes += eofs.eof;
                        totals.total_bytes_uncompressed += eofs.eof_uncompressed;
                    }
                }
            }
            if info.state != SegmentState::AwaitingDrop {
                totals.total_tuples += info.total_tupcount;
            }
            totals.total_varblocks += info.varblockcount;
            totals.modcount += info.modcount;
            totals.total_filesegs += 1;
        }
        Ok(totals)
    }
}

fn build_info(row: &SegFileRow, modcount: i64, state: SegmentState) -> SegmentFileInfo {
    SegmentFileInfo {
        segno: row.segno,
        eof: row.eof,
        eof_uncompressed: row.eof_uncompressed,
        total_tupcount: row.tupcount,
        varblockcount: row.varblockcount,
        modcount,
        formatversion: row.formatversion,
        state,
        columns: row.columns.clone(),
    }
}

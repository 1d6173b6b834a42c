//! Block directory: maps row numbers of an append-only segment to the byte
//! ranges of the data blocks holding them.
//!
//! Entries are collected in per-column-group minipages. An insert session
//! appends to the tail minipage in memory and writes it to the catalog when
//! it fills up or the session ends. Readers find the minipage covering a row
//! with a backward ordered lookup on (segno, column group, first row).

pub mod entry;
pub mod minipage;
pub mod scan;

use std::ops::RangeInclusive;

use bincode::{Decode, Encode};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::segfiles::SegmentFileInfo;
use crate::storage::catalog::{AoRelation, Catalog};
use crate::storage::heap::CatalogRow;
use crate::storage::index::RowId;
use crate::txn::{Snapshot, Transaction, TransactionManager};
use crate::types::{AoTupleId, MAX_ROW_NUM, RelId, RowNum, SegNo, heap_block_segno, heap_block_start_row};

pub use self::entry::{DirectoryEntry, resolve_range};
pub use self::minipage::{Minipage, MinipageEntry, MinipageSlot};
pub use self::scan::BlockDirectoryScan;

/// Column group uniqueness checks and placeholders use; coverage checks
/// use the lowest projected group, which is this one without a projection
pub const ANCHOR_COLUMN_GROUP: usize = 0;

/// Catalog row holding one minipage
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlkDirRow {
    pub relid: RelId,
    pub segno: SegNo,
    pub column_group_no: i32,
    /// First row of the minipage's first entry
    pub first_row_num: RowNum,
    pub minipage: Vec<u8>,
}

impl CatalogRow for BlkDirRow {
    type Key = (RelId, SegNo, i32, RowNum);

    fn key(&self) -> Self::Key {
        (self.relid, self.segno, self.column_group_no, self.first_row_num)
    }
}

fn key_range(relid: RelId, segno: SegNo, column_group: usize, upto: RowNum) -> RangeInclusive<(RelId, SegNo, i32, RowNum)> {
    let cg = column_group as i32;
    (relid, segno, cg, RowNum::MIN)..=(relid, segno, cg, upto)
}

fn decode_minipage(rel: &AoRelation, row: &BlkDirRow, row_num: RowNum, capacity: usize) -> Result<Minipage> {
    let minipage = Minipage::decode(&row.minipage, capacity).map_err(|e| {
        Error::corruption(
            &rel.name,
            row.segno,
            Some(row_num),
            format!("unreadable minipage of column group {}: {}", row.column_group_no, e),
        )
    })?;
    if let Some(i) = minipage.find_disorder() {
        let entry = minipage.entries[i];
        return Err(Error::corruption(
            &rel.name,
            row.segno,
            Some(row_num),
            format!(
                "minipage entry {} (first row {}, offset {}) is out of order",
                i, entry.first_row_num, entry.file_offset
            ),
        ));
    }
    Ok(minipage)
}

/// Every minipage row of `rel` visible to `snapshot`, in key order
pub fn visible_minipages(
    catalog: &Catalog,
    mgr: &TransactionManager,
    rel: &AoRelation,
    snapshot: &Snapshot,
) -> Vec<BlkDirRow> {
    let relid = rel.relid;
    catalog
        .blkdir
        .read()
        .scan((relid, SegNo::MIN, i32::MIN, RowNum::MIN)..=(relid, SegNo::MAX, i32::MAX, RowNum::MAX), snapshot, mgr)
        .into_iter()
        .map(|(_, row)| row)
        .collect()
}

/// Newest visible minipage of (segno, column group) starting at or before `upto`
fn read_last_minipage(
    catalog: &Catalog,
    mgr: &TransactionManager,
    rel: &AoRelation,
    snapshot: &Snapshot,
    segno: SegNo,
    column_group: usize,
    upto: RowNum,
    capacity: usize,
) -> Result<Option<(RowId, Minipage)>> {
    let found = catalog
        .blkdir
        .read()
        .last_visible(key_range(rel.relid, segno, column_group, upto), snapshot, mgr);
    match found {
        Some((id, row)) => Ok(Some((id, decode_minipage(rel, &row, upto, capacity)?))),
        None => Ok(None),
    }
}

/// First visible minipage of (segno, column group) starting after `after`
fn read_next_minipage(
    catalog: &Catalog,
    mgr: &TransactionManager,
    rel: &AoRelation,
    snapshot: &Snapshot,
    segno: SegNo,
    column_group: usize,
    after: RowNum,
    capacity: usize,
) -> Result<Option<(RowId, Minipage)>> {
    let cg = column_group as i32;
    let range = (rel.relid, segno, cg, after.saturating_add(1))..=(rel.relid, segno, cg, RowNum::MAX);
    let found = catalog.blkdir.read().first_visible(range, snapshot, mgr);
    match found {
        Some((id, row)) => Ok(Some((id, decode_minipage(rel, &row, after, capacity)?))),
        None => Ok(None),
    }
}

/// Whether any minipage visible to `snapshot` has an entry covering `tid`.
///
/// The slot's cached minipage is consulted only under an MVCC snapshot;
/// other snapshots always read the catalog so their side effects happen.
fn entry_exists(
    catalog: &Catalog,
    mgr: &TransactionManager,
    rel: &AoRelation,
    capacity: usize,
    slot: &mut MinipageSlot,
    snapshot: &Snapshot,
    tid: AoTupleId,
    column_group: usize,
) -> Result<bool> {
    let cacheable = snapshot.is_mvcc();
    if cacheable && slot.segno == Some(tid.segno) && slot.find_entry(tid.row_num).is_some() {
        return Ok(true);
    }

    let heap = catalog.blkdir.read();
    let range = key_range(rel.relid, tid.segno, column_group, tid.row_num);
    // a dirty snapshot must only report the writers of the covering row
    for (id, row) in heap.visible_back(range, snapshot, mgr) {
        let minipage = decode_minipage(rel, row, tid.row_num, capacity)?;
        let mut candidate = MinipageSlot::loaded(tid.segno, minipage, id);
        if candidate.find_entry(tid.row_num).is_some() {
            if cacheable {
                *slot = candidate;
            }
            return Ok(true);
        }
    }
    if let Snapshot::Dirty(dirty) = snapshot {
        dirty.reset();
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryMode {
    /// Appending entries for one segment
    Insert,
    /// Point and range lookups over a fixed set of segments
    Search,
    /// Uniqueness checks under caller-supplied dirty or self snapshots
    UniqueCheck,
    /// Coverage checks under one MVCC snapshot
    IndexOnlyScan,
}

/// A block directory session. Its minipage cache is private to the session.
pub struct BlockDirectory<'a> {
    catalog: &'a Catalog,
    txn: &'a Transaction,
    rel: AoRelation,
    mode: DirectoryMode,
    /// False when the relation has no block directory
    enabled: bool,
    snapshot: Option<Snapshot>,
    minipage_size: usize,
    min_range: i64,
    /// Segments a search session may resolve
    seginfos: Vec<SegmentFileInfo>,
    /// Segment an insert session appends to
    insert_seginfo: Option<SegmentFileInfo>,
    projection: Vec<usize>,
    minipages: Vec<MinipageSlot>,
}

impl<'a> BlockDirectory<'a> {
    fn new(
        catalog: &'a Catalog,
        txn: &'a Transaction,
        rel: &AoRelation,
        config: &Config,
        mode: DirectoryMode,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let groups = rel.num_column_groups();
        BlockDirectory {
            catalog,
            txn,
            rel: rel.clone(),
            mode,
            enabled: rel.has_block_directory,
            snapshot,
            minipage_size: config.minipage_size,
            min_range: config.entry_min_range,
            seginfos: Vec::new(),
            insert_seginfo: None,
            projection: (0..groups).collect(),
            minipages: vec![MinipageSlot::default(); groups],
        }
    }

    fn require_directory(&self, op: &str) -> Result<()> {
        if !self.enabled {
            return Err(Error::Configuration(format!(
                "{}: relation \"{}\" has no block directory",
                op, self.rel.name
            )));
        }
        Ok(())
    }

    fn require_mode(&self, op: &str, allowed: &[DirectoryMode]) -> Result<()> {
        if !allowed.contains(&self.mode) {
            return Err(Error::Configuration(format!(
                "{} is not available on a {:?} block directory of relation \"{}\"",
                op, self.mode, self.rel.name
            )));
        }
        Ok(())
    }

    fn check_column_group(&self, column_group: usize) -> Result<()> {
        if column_group >= self.minipages.len() {
            return Err(Error::Configuration(format!(
                "column group {} out of range for relation \"{}\" with {} groups",
                column_group,
                self.rel.name,
                self.minipages.len()
            )));
        }
        Ok(())
    }

    fn mgr(&self) -> &'a TransactionManager {
        self.txn.manager()
    }

    /// Open the directory for appending to `seginfo`'s segment. The tail
    /// minipage of every column group is loaded from the catalog, anchored at
    /// `last_sequence` (the last row number handed out before this session).
    ///
    /// A relation without a block directory yields a directory that accepts
    /// and ignores entries.
    pub fn init_for_insert(
        catalog: &'a Catalog,
        txn: &'a Transaction,
        rel: &AoRelation,
        config: &Config,
        seginfo: &SegmentFileInfo,
        last_sequence: i64,
    ) -> Result<Self> {
        let mut dir = Self::new(catalog, txn, rel, config, DirectoryMode::Insert, Some(txn.self_snapshot()));
        let segno = seginfo.segno;
        dir.insert_seginfo = Some(seginfo.clone());
        if !dir.enabled {
            return Ok(dir);
        }
        if !dir.mgr().locks().is_held_by(rel.relid, segno, txn.xid()) {
            return Err(Error::Configuration(format!(
                "inserting into relation \"{}\" segno {} requires the segment lock",
                rel.name, segno
            )));
        }

        let anchor = if last_sequence == 0 { 1 } else { last_sequence };
        let snapshot = txn.self_snapshot();
        for cg in 0..dir.minipages.len() {
            dir.minipages[cg].segno = Some(segno);
            let found = read_last_minipage(catalog, dir.mgr(), rel, &snapshot, segno, cg, anchor, dir.minipage_size)?;
            if let Some((id, mut minipage)) = found {
                // placeholder left by a session that never wrote its real entries
                if minipage.last().is_some_and(|e| e.row_count == MAX_ROW_NUM) {
                    minipage.entries.pop();
                }
                dir.minipages[cg].load(segno, minipage, id);
            }
        }

        debug!(
            relid = rel.relid,
            segno,
            last_sequence,
            column_groups = dir.minipages.len(),
            "block directory opened for insert"
        );
        Ok(dir)
    }

    /// Open the directory for lookups over `seginfos` under `snapshot`.
    /// `projection` limits which column groups are loaded; `None` means all.
    pub fn init_for_search(
        catalog: &'a Catalog,
        txn: &'a Transaction,
        rel: &AoRelation,
        config: &Config,
        seginfos: Vec<SegmentFileInfo>,
        snapshot: Snapshot,
        projection: Option<&[usize]>,
    ) -> Result<Self> {
        let mut dir = Self::new(catalog, txn, rel, config, DirectoryMode::Search, Some(snapshot));
        dir.require_directory("search")?;
        if let Some(projection) = projection {
            let mut projection = projection.to_vec();
            projection.sort_unstable();
            projection.dedup();
            if projection.is_empty() {
                return Err(Error::Configuration("empty column projection".to_string()));
            }
            for cg in &projection {
                dir.check_column_group(*cg)?;
            }
            dir.projection = projection;
        }
        dir.seginfos = seginfos;
        debug!(
            relid = rel.relid,
            segments = dir.seginfos.len(),
            projection = ?dir.projection,
            "block directory opened for search"
        );
        Ok(dir)
    }

    /// Open the directory for uniqueness checks. No snapshot is kept; each
    /// check brings its own.
    pub fn init_for_unique_checks(
        catalog: &'a Catalog,
        txn: &'a Transaction,
        rel: &AoRelation,
        config: &Config,
    ) -> Result<Self> {
        let dir = Self::new(catalog, txn, rel, config, DirectoryMode::UniqueCheck, None);
        dir.require_directory("unique checks")?;
        debug!(relid = rel.relid, "block directory opened for unique checks");
        Ok(dir)
    }

    /// Open the directory for index-only scans under an MVCC snapshot
    pub fn init_for_index_only_scan(
        catalog: &'a Catalog,
        txn: &'a Transaction,
        rel: &AoRelation,
        config: &Config,
        snapshot: Snapshot,
    ) -> Result<Self> {
        if !snapshot.is_mvcc() {
            return Err(Error::Configuration(
                "index-only scans need an MVCC snapshot".to_string(),
            ));
        }
        let dir = Self::new(catalog, txn, rel, config, DirectoryMode::IndexOnlyScan, Some(snapshot));
        dir.require_directory("index-only scan")?;
        debug!(relid = rel.relid, "block directory opened for index-only scan");
        Ok(dir)
    }

    pub fn mode(&self) -> DirectoryMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn relation(&self) -> &AoRelation {
        &self.rel
    }

    pub fn seginfos(&self) -> &[SegmentFileInfo] {
        &self.seginfos
    }

    /// Entries buffered in memory for `column_group`
    pub fn pending_entries(&self, column_group: usize) -> &[MinipageEntry] {
        self.minipages
            .get(column_group)
            .map(|slot| slot.minipage.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Raise the EOF an insert session resolves its own entries against
    pub(crate) fn advance_insert_eof(&mut self, column_group: usize, eof: i64) {
        if let Some(info) = self.insert_seginfo.as_mut() {
            if info.columns.is_empty() {
                info.eof = info.eof.max(eof);
            } else if let Some(column) = info.columns.get_mut(column_group) {
                column.eof = column.eof.max(eof);
            }
        }
    }

    /// Record that rows `[first_row_num, first_row_num + row_count)` start at
    /// `file_offset`. Returns false when nothing was recorded (empty block or
    /// no directory).
    pub fn insert_entry(
        &mut self,
        column_group: usize,
        first_row_num: RowNum,
        file_offset: i64,
        row_count: i64,
    ) -> Result<bool> {
        if row_count == 0 || !self.enabled {
            return Ok(false);
        }
        self.require_mode("insert entry", &[DirectoryMode::Insert])?;
        self.check_column_group(column_group)?;

        let segno = self.insert_segno();
        let min_range = self.min_range;
        let slot = &mut self.minipages[column_group];
        if let Some(last) = slot.minipage.entries.last_mut() {
            if first_row_num < last.end_row() || file_offset < last.file_offset {
                return Err(Error::corruption(
                    &self.rel.name,
                    segno,
                    Some(first_row_num),
                    format!(
                        "entry at offset {} overlaps previous entry (first row {}, {} rows, offset {})",
                        file_offset, last.first_row_num, last.row_count, last.file_offset
                    ),
                ));
            }
            if min_range > 0 && file_offset - last.file_offset < min_range {
                last.row_count = first_row_num + row_count - last.first_row_num;
                trace!(
                    segno,
                    column_group,
                    first_row_num = last.first_row_num,
                    row_count = last.row_count,
                    "directory entry widened"
                );
                return Ok(true);
            }
        }

        self.push_entry(
            column_group,
            MinipageEntry {
                first_row_num,
                file_offset,
                row_count,
            },
        )?;
        trace!(segno, column_group, first_row_num, file_offset, row_count, "directory entry added");
        Ok(true)
    }

    fn insert_segno(&self) -> SegNo {
        self.insert_seginfo.as_ref().map(|info| info.segno).unwrap_or(-1)
    }

    fn push_entry(&mut self, column_group: usize, entry: MinipageEntry) -> Result<()> {
        if self.minipages[column_group].minipage.len() >= self.minipage_size {
            self.write_minipage(column_group)?;
            self.minipages[column_group].clear();
        }
        self.minipages[column_group].minipage.entries.push(entry);
        Ok(())
    }

    /// Write the in-memory minipage of `column_group` to the catalog,
    /// replacing the row it came from if there is one
    fn write_minipage(&mut self, column_group: usize) -> Result<()> {
        let segno = self.insert_segno();
        let slot = &self.minipages[column_group];
        let Some(first) = slot.minipage.first() else {
            return Ok(());
        };
        let row = BlkDirRow {
            relid: self.rel.relid,
            segno,
            column_group_no: column_group as i32,
            first_row_num: first.first_row_num,
            minipage: slot.minipage.encode(),
        };
        let entries = slot.minipage.len();
        let previous = slot.row_id;

        let id = {
            let mut heap = self.catalog.blkdir.write();
            match previous {
                Some(id) => heap.update(id, row, self.txn, self.mgr())?,
                None => heap.insert(row, self.txn),
            }
        };
        self.minipages[column_group].row_id = Some(id);
        debug!(
            relid = self.rel.relid,
            segno,
            column_group,
            entries,
            replaced = previous.is_some(),
            "minipage written"
        );
        Ok(())
    }

    /// Make rows from `first_row_num` on look covered before their real entry
    /// exists: write a minipage whose last entry spans to the maximum row
    /// number, then forget that entry in memory. The command counter is
    /// bumped so the real write later in this transaction can replace the row.
    pub fn insert_placeholder(
        &mut self,
        column_group: usize,
        first_row_num: RowNum,
        file_offset: i64,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        self.require_mode("insert placeholder", &[DirectoryMode::Insert])?;
        self.check_column_group(column_group)?;

        self.push_entry(
            column_group,
            MinipageEntry {
                first_row_num,
                file_offset,
                row_count: MAX_ROW_NUM,
            },
        )?;
        self.write_minipage(column_group)?;
        let slot = &mut self.minipages[column_group];
        slot.minipage.entries.pop();
        slot.cached_entry_no = None;
        self.txn.command_counter_increment();

        debug!(
            relid = self.rel.relid,
            segno = self.insert_segno(),
            column_group,
            first_row_num,
            file_offset,
            "placeholder entry written"
        );
        Ok(true)
    }

    /// Flush every non-empty minipage and close the insert session
    pub fn end_for_insert(mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.require_mode("end insert", &[DirectoryMode::Insert])?;
        for cg in 0..self.minipages.len() {
            if !self.minipages[cg].minipage.is_empty() {
                self.write_minipage(cg)?;
            }
        }
        debug!(relid = self.rel.relid, segno = self.insert_segno(), "block directory insert finished");
        Ok(())
    }

    fn seginfo_for(&self, segno: SegNo, row_num: RowNum) -> Result<SegmentFileInfo> {
        let found = match self.mode {
            DirectoryMode::Insert => self.insert_seginfo.as_ref().filter(|info| info.segno == segno),
            _ => self.seginfos.iter().find(|info| info.segno == segno),
        };
        found.cloned().ok_or_else(|| {
            Error::corruption(
                &self.rel.name,
                segno,
                Some(row_num),
                "segment is not among the segments this directory was opened for",
            )
        })
    }

    fn resolve(&self, slot: &MinipageSlot, entry_no: usize, seginfo: &SegmentFileInfo, column_group: usize) -> Option<DirectoryEntry> {
        resolve_range(
            &slot.minipage,
            entry_no,
            seginfo.segno,
            column_group,
            seginfo.eof_for(column_group),
            self.min_range,
        )
    }

    /// Resolve the entry holding `tid` in `column_group`.
    ///
    /// `None` means no visible entry covers the row: it was never written,
    /// belongs to an aborted insert, or lies past the committed EOF.
    pub fn get_entry(&mut self, tid: AoTupleId, column_group: usize) -> Result<Option<DirectoryEntry>> {
        self.require_directory("get entry")?;
        self.require_mode("get entry", &[DirectoryMode::Insert, DirectoryMode::Search])?;
        self.check_column_group(column_group)?;
        if self.mode == DirectoryMode::Search && !self.projection.contains(&column_group) {
            return Err(Error::Configuration(format!(
                "column group {} is not in the projection of this directory",
                column_group
            )));
        }

        let AoTupleId { segno, row_num } = tid;
        trace!(relid = self.rel.relid, segno, row_num, column_group, "directory lookup");
        let seginfo = self.seginfo_for(segno, row_num)?;

        {
            let slot = &mut self.minipages[column_group];
            let starts_before = slot.minipage.first().is_some_and(|e| e.first_row_num <= row_num);
            if slot.segno == Some(segno) && starts_before {
                if let Some(i) = slot.find_entry(row_num) {
                    let slot = &self.minipages[column_group];
                    return Ok(self.resolve(slot, i, &seginfo, column_group));
                }
                if slot.minipage.last().is_some_and(|e| row_num < e.end_row()) {
                    debug!(segno, row_num, column_group, "row falls in a hole of the cached minipage");
                    return Ok(None);
                }
            }
        }

        let Some(snapshot) = self.snapshot.as_ref() else {
            return Err(Error::Configuration("directory has no snapshot".to_string()));
        };

        if self.mode == DirectoryMode::Insert {
            // keep the unflushed tail minipage; look older ones up on the side
            let found = read_last_minipage(
                self.catalog,
                self.txn.manager(),
                &self.rel,
                snapshot,
                segno,
                column_group,
                row_num,
                self.minipage_size,
            )?;
            let Some((id, minipage)) = found else {
                return Ok(None);
            };
            let slot = MinipageSlot::loaded(segno, minipage, id);
            return Ok(self.pick_entry(slot, row_num, &seginfo, column_group));
        }

        for cg in self.projection.clone() {
            let found = read_last_minipage(
                self.catalog,
                self.txn.manager(),
                &self.rel,
                snapshot,
                segno,
                cg,
                row_num,
                self.minipage_size,
            )?;
            match found {
                Some((id, minipage)) => self.minipages[cg].load(segno, minipage, id),
                None => {
                    debug!(segno, row_num, column_group = cg, "no minipage at or before row");
                    self.minipages[cg] = MinipageSlot::default();
                    return Ok(None);
                }
            }
        }

        let slot = self.minipages[column_group].clone();
        let (entry, slot) = self.pick_entry_keep(slot, row_num, &seginfo, column_group);
        self.minipages[column_group] = slot;
        Ok(entry)
    }

    fn pick_entry(&self, slot: MinipageSlot, row_num: RowNum, seginfo: &SegmentFileInfo, column_group: usize) -> Option<DirectoryEntry> {
        self.pick_entry_keep(slot, row_num, seginfo, column_group).0
    }

    /// Entry of a freshly loaded minipage for `row_num`. Rows past the last
    /// entry resolve to it only when entries are open-ended (`min_range`).
    fn pick_entry_keep(
        &self,
        mut slot: MinipageSlot,
        row_num: RowNum,
        seginfo: &SegmentFileInfo,
        column_group: usize,
    ) -> (Option<DirectoryEntry>, MinipageSlot) {
        if let Some(i) = slot.find_entry(row_num) {
            let entry = self.resolve(&slot, i, seginfo, column_group);
            return (entry, slot);
        }
        let Some(last) = slot.minipage.last().copied() else {
            return (None, slot);
        };
        if row_num >= last.end_row() && self.min_range != 0 {
            let entry = self.resolve(&slot, slot.minipage.len() - 1, seginfo, column_group);
            return (entry, slot);
        }
        debug!(segno = seginfo.segno, row_num, column_group, "row is not covered by any entry");
        (None, slot)
    }

    /// Find where a scan of heap block `blkno` should start reading.
    ///
    /// Returns the index of the segment in the directory's segment list and
    /// the entry to start from. A start row inside a gap resolves to the next
    /// entry; a gap at the tail of a minipage resolves to its last entry.
    pub fn get_entry_for_partial_scan(
        &mut self,
        blkno: u32,
        column_group: usize,
    ) -> Result<Option<(usize, DirectoryEntry)>> {
        self.require_directory("partial scan")?;
        self.require_mode("partial scan", &[DirectoryMode::Search])?;
        self.check_column_group(column_group)?;

        let segno = heap_block_segno(blkno);
        let start_row = heap_block_start_row(blkno);
        trace!(relid = self.rel.relid, segno, start_row, column_group, "partial scan lookup");

        let seg_index = self
            .seginfos
            .iter()
            .position(|info| info.segno == segno)
            .ok_or_else(|| {
                Error::corruption(
                    &self.rel.name,
                    segno,
                    Some(start_row),
                    "segment is not among the segments this directory was opened for",
                )
            })?;
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Err(Error::Configuration("directory has no snapshot".to_string()));
        };

        let mgr = self.txn.manager();
        let found = match read_last_minipage(
            self.catalog,
            mgr,
            &self.rel,
            snapshot,
            segno,
            column_group,
            start_row,
            self.minipage_size,
        )? {
            Some(found) => Some(found),
            // start lies before the first minipage
            None => read_next_minipage(
                self.catalog,
                mgr,
                &self.rel,
                snapshot,
                segno,
                column_group,
                start_row,
                self.minipage_size,
            )?,
        };
        let Some((id, minipage)) = found else {
            return Ok(None);
        };
        self.minipages[column_group].load(segno, minipage, id);

        let slot = &self.minipages[column_group];
        let entries = &slot.minipage.entries;
        if entries.is_empty() {
            return Ok(None);
        }
        let next = entries.partition_point(|e| e.first_row_num <= start_row);
        let entry_no = if next == 0 {
            0
        } else if entries[next - 1].covers(start_row) || next == entries.len() {
            next - 1
        } else {
            next
        };

        let seginfo = &self.seginfos[seg_index];
        Ok(self.resolve(slot, entry_no, seginfo, column_group).map(|e| (seg_index, e)))
    }

    /// Whether `tid` is covered by an entry visible to this directory's
    /// MVCC snapshot, checked on the lowest projected column group
    pub fn covers_tuple(&mut self, tid: AoTupleId) -> Result<bool> {
        self.require_directory("covers tuple")?;
        self.require_mode("covers tuple", &[DirectoryMode::Search, DirectoryMode::IndexOnlyScan])?;
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Err(Error::Configuration("directory has no snapshot".to_string()));
        };
        let anchor = self.projection.first().copied().unwrap_or(ANCHOR_COLUMN_GROUP);
        entry_exists(
            self.catalog,
            self.txn.manager(),
            &self.rel,
            self.minipage_size,
            &mut self.minipages[anchor],
            snapshot,
            tid,
            anchor,
        )
    }

    /// Whether `tid` is covered by an entry visible to `snapshot`, which must
    /// be a dirty or self snapshot. The minipage cache is bypassed.
    pub fn unique_check(&mut self, tid: AoTupleId, snapshot: &Snapshot) -> Result<bool> {
        self.require_directory("unique check")?;
        self.require_mode("unique check", &[DirectoryMode::UniqueCheck])?;
        if !matches!(snapshot, Snapshot::Dirty(_) | Snapshot::SelfVisible { .. }) {
            return Err(Error::Configuration(
                "unique checks need a dirty or self snapshot".to_string(),
            ));
        }
        let covered = entry_exists(
            self.catalog,
            self.txn.manager(),
            &self.rel,
            self.minipage_size,
            &mut self.minipages[ANCHOR_COLUMN_GROUP],
            snapshot,
            tid,
            ANCHOR_COLUMN_GROUP,
        )?;
        trace!(relid = self.rel.relid, %tid, covered, "unique check");
        Ok(covered)
    }

    /// Delete every minipage row of (segno, column group). Returns the
    /// number of rows deleted.
    pub fn delete_segment_file(
        catalog: &Catalog,
        txn: &Transaction,
        rel: &AoRelation,
        column_group: usize,
        segno: SegNo,
    ) -> Result<usize> {
        if !rel.has_block_directory {
            return Ok(0);
        }
        let mgr = txn.manager();
        let mut heap = catalog.blkdir.write();
        let rows = heap.scan(key_range(rel.relid, segno, column_group, RowNum::MAX), &txn.self_snapshot(), mgr);
        for (id, _) in &rows {
            heap.delete(*id, txn, mgr)?;
        }
        debug!(relid = rel.relid, segno, column_group, deleted = rows.len(), "directory rows deleted");
        Ok(rows.len())
    }

    /// Delete the minipage rows of every column group of `segno`
    pub fn delete_segment_files(
        catalog: &Catalog,
        txn: &Transaction,
        rel: &AoRelation,
        segno: SegNo,
    ) -> Result<usize> {
        let mut deleted = 0;
        for cg in 0..rel.num_column_groups() {
            deleted += Self::delete_segment_file(catalog, txn, rel, cg, segno)?;
        }
        Ok(deleted)
    }
}

use std::mem;

use tracing::{debug, trace};

use crate::access::file_error;
use crate::blockdir::{ANCHOR_COLUMN_GROUP, BlockDirectory};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::segfiles::{ColumnEof, SegmentFileInfo};
use crate::storage::catalog::AoRelation;
use crate::storage::files::{SegmentFileWriter, segment_file_path};
use crate::txn::Transaction;
use crate::types::{AoTupleId, RowNum, SegNo};

/// Rows buffered for the block being built in one column group
#[derive(Default)]
struct PendingBlock {
    first_row_num: RowNum,
    rows: Vec<Vec<u8>>,
    bytes: usize,
}

/// What an insert session added to its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertSummary {
    pub segno: SegNo,
    pub tuples: i64,
    pub blocks: i64,
    /// Last row number handed out, 0 if none
    pub last_row_num: RowNum,
}

/// Appends rows to one segment of a relation within a transaction.
///
/// The session holds the segment lock until the transaction ends. Every
/// finished block gets a directory entry; `finish` makes the new EOFs and
/// counts visible through the segment catalog.
pub struct InsertSession<'a> {
    db: &'a Database,
    txn: &'a Transaction,
    rel: AoRelation,
    seginfo: SegmentFileInfo,
    blkdir: BlockDirectory<'a>,
    writers: Vec<SegmentFileWriter>,
    pending: Vec<PendingBlock>,
    next_row_num: RowNum,
    /// Last row number of the reserved batch
    reserved_upto: RowNum,
    last_row_num: RowNum,
    tuples: i64,
    blocks: i64,
    /// Write a placeholder entry before the first row so unique checks of
    /// other transactions see rows that have no real entry yet
    needs_placeholder: bool,
}

impl<'a> InsertSession<'a> {
    pub fn begin(
        db: &'a Database,
        txn: &'a Transaction,
        rel: &AoRelation,
        segno: SegNo,
        unique_index: bool,
    ) -> Result<Self> {
        let segs = db.segfiles(rel);
        // lock before looking: a concurrent session may be creating the row
        db.lock_segment(txn, rel, segno);
        if segs.get_info(txn, &txn.self_snapshot(), segno, true)?.is_none() {
            segs.insert(txn, segno)?;
        }
        let seginfo = segs
            .get_info(txn, &txn.self_snapshot(), segno, true)?
            .ok_or_else(|| Error::corruption(&rel.name, segno, None, "segment row vanished after lock"))?;
        if seginfo.is_awaiting_drop() {
            return Err(Error::Configuration(format!(
                "segment {} of relation \"{}\" is AWAITING_DROP and cannot take inserts",
                segno, rel.name
            )));
        }

        let last_sequence = db.fast_sequence().read_last(rel.relid, segno);
        let blkdir = BlockDirectory::init_for_insert(db.catalog(), txn, rel, db.config(), &seginfo, last_sequence)?;

        let mut writers = Vec::with_capacity(rel.num_column_groups());
        for cg in 0..rel.num_column_groups() {
            let path = segment_file_path(db.config().data_dir(), rel.relid, cg, segno);
            let writer = SegmentFileWriter::open_for_append(&path, seginfo.eof_for(cg), db.config().fsync)
                .map_err(|e| file_error(rel, segno, None, e))?;
            writers.push(writer);
        }

        debug!(relid = rel.relid, segno, eof = seginfo.eof, last_sequence, "insert session started");
        Ok(InsertSession {
            db,
            txn,
            rel: rel.clone(),
            pending: (0..writers.len()).map(|_| PendingBlock::default()).collect(),
            seginfo,
            blkdir,
            writers,
            next_row_num: last_sequence + 1,
            reserved_upto: last_sequence,
            last_row_num: 0,
            tuples: 0,
            blocks: 0,
            needs_placeholder: unique_index,
        })
    }

    pub fn segno(&self) -> SegNo {
        self.seginfo.segno
    }

    fn next_row(&mut self) -> Result<RowNum> {
        if self.next_row_num > self.reserved_upto {
            let batch = self.db.config().fast_sequence_batch;
            let first = self.db.fast_sequence().allocate(&self.rel, self.seginfo.segno, batch)?;
            self.next_row_num = first;
            self.reserved_upto = first + batch - 1;
        }
        let row = self.next_row_num;
        self.next_row_num += 1;
        Ok(row)
    }

    /// Append one row; `values` holds one value per column group (a single
    /// value for row-oriented relations)
    pub fn insert(&mut self, values: Vec<Vec<u8>>) -> Result<AoTupleId> {
        if values.len() != self.writers.len() {
            return Err(Error::Configuration(format!(
                "relation \"{}\" takes {} values per row, got {}",
                self.rel.name,
                self.writers.len(),
                values.len()
            )));
        }
        let row_num = self.next_row()?;

        if self.needs_placeholder {
            let offset = self.writers[ANCHOR_COLUMN_GROUP].eof();
            self.blkdir.insert_placeholder(ANCHOR_COLUMN_GROUP, row_num, offset)?;
            self.needs_placeholder = false;
        }

        for (cg, value) in values.into_iter().enumerate() {
            let pending = &mut self.pending[cg];
            if pending.rows.is_empty() {
                pending.first_row_num = row_num;
            }
            pending.bytes += value.len();
            pending.rows.push(value);
            let full = pending.rows.len() >= self.db.config().max_rows_per_block
                || pending.bytes >= self.db.config().block_size;
            if full {
                self.flush_block(cg)?;
            }
        }

        self.tuples += 1;
        self.last_row_num = row_num;
        trace!(segno = self.seginfo.segno, row_num, "row appended");
        Ok(AoTupleId::new(self.seginfo.segno, row_num))
    }

    fn flush_block(&mut self, column_group: usize) -> Result<()> {
        let pending = mem::take(&mut self.pending[column_group]);
        if pending.rows.is_empty() {
            return Ok(());
        }
        let writer = &mut self.writers[column_group];
        let offset = writer
            .append_block(pending.first_row_num, &pending.rows)
            .map_err(|e| file_error(&self.rel, self.seginfo.segno, Some(pending.first_row_num), e))?;
        let eof = writer.eof();
        self.blkdir
            .insert_entry(column_group, pending.first_row_num, offset, pending.rows.len() as i64)?;
        self.blkdir.advance_insert_eof(column_group, eof);
        self.blocks += 1;
        trace!(
            segno = self.seginfo.segno,
            column_group,
            first_row_num = pending.first_row_num,
            rows = pending.rows.len(),
            offset,
            "block written"
        );
        Ok(())
    }

    /// Flush the open blocks, write the directory and record the new EOFs
    /// and counts in the segment catalog
    pub fn finish(mut self) -> Result<InsertSummary> {
        for cg in 0..self.writers.len() {
            self.flush_block(cg)?;
        }
        let mut eofs = Vec::with_capacity(self.writers.len());
        for writer in &mut self.writers {
            let eof = writer
                .flush()
                .map_err(|e| file_error(&self.rel, self.seginfo.segno, None, e))?;
            eofs.push(ColumnEof { eof, eof_uncompressed: eof });
        }

        let InsertSession { db, txn, rel, seginfo, blkdir, tuples, blocks, last_row_num, .. } = self;
        blkdir.end_for_insert()?;
        db.segfiles(&rel).update(txn, seginfo.segno, &eofs, tuples, blocks, 1)?;

        debug!(relid = rel.relid, segno = seginfo.segno, tuples, blocks, "insert session finished");
        Ok(InsertSummary {
            segno: seginfo.segno,
            tuples,
            blocks,
            last_row_num,
        })
    }
}

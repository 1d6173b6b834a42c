use std::collections::BTreeMap;

use tracing::trace;

use crate::access::file_error;
use crate::access::visimap::{AllVisible, Visimap};
use crate::blockdir::BlockDirectory;
use crate::db::Database;
use crate::error::Result;
use crate::storage::catalog::AoRelation;
use crate::storage::files::{SegmentFileReader, segment_file_path};
use crate::txn::{Snapshot, Transaction};
use crate::types::{AoTupleId, ROWS_PER_HEAP_BLOCK, RowNum, heap_block_segno, heap_block_start_row};

/// Reads the rows of one heap block number at a time, as a bitmap heap scan
/// does: the directory positions the read, then blocks are scanned forward
/// until the heap block's row range is passed.
pub struct BlockRangeScan<'a> {
    db: &'a Database,
    rel: AoRelation,
    blkdir: BlockDirectory<'a>,
    visimap: Box<dyn Visimap + 'a>,
    projection: Vec<usize>,
}

impl<'a> BlockRangeScan<'a> {
    pub fn new(
        db: &'a Database,
        txn: &'a Transaction,
        rel: &AoRelation,
        snapshot: Snapshot,
        projection: Option<&[usize]>,
    ) -> Result<Self> {
        let seginfos = db.segfiles(rel).get_all(&snapshot)?;
        let blkdir = BlockDirectory::init_for_search(db.catalog(), txn, rel, db.config(), seginfos, snapshot, projection)?;
        let projection = match projection {
            Some(p) => {
                let mut p = p.to_vec();
                p.sort_unstable();
                p.dedup();
                p
            }
            None => (0..rel.num_column_groups()).collect(),
        };
        Ok(BlockRangeScan {
            db,
            rel: rel.clone(),
            blkdir,
            visimap: Box::new(AllVisible),
            projection,
        })
    }

    pub fn with_visimap(mut self, visimap: Box<dyn Visimap + 'a>) -> Self {
        self.visimap = visimap;
        self
    }

    /// Visible rows of heap block `blkno` with their projected values, in
    /// row number order
    pub fn rows_in_block(&mut self, blkno: u32) -> Result<Vec<(AoTupleId, Vec<Vec<u8>>)>> {
        let segno = heap_block_segno(blkno);
        let start_row = heap_block_start_row(blkno);
        let end_row = start_row + ROWS_PER_HEAP_BLOCK;

        let mut merged: BTreeMap<RowNum, Vec<Vec<u8>>> = BTreeMap::new();
        for (i, cg) in self.projection.clone().into_iter().enumerate() {
            let values = self.column_rows(blkno, cg, start_row, end_row)?;
            if i == 0 {
                merged = values.into_iter().map(|(row, v)| (row, vec![v])).collect();
            } else {
                let mut values = values;
                merged.retain(|row, _| values.contains_key(row));
                for (row, columns) in merged.iter_mut() {
                    if let Some(v) = values.remove(row) {
                        columns.push(v);
                    }
                }
            }
        }

        let rows: Vec<_> = merged
            .into_iter()
            .map(|(row, values)| (AoTupleId::new(segno, row), values))
            .filter(|(tid, _)| self.visimap.is_visible(*tid))
            .collect();
        trace!(relid = self.rel.relid, blkno, segno, rows = rows.len(), "heap block scanned");
        Ok(rows)
    }

    fn column_rows(
        &mut self,
        blkno: u32,
        column_group: usize,
        start_row: RowNum,
        end_row: RowNum,
    ) -> Result<BTreeMap<RowNum, Vec<u8>>> {
        let mut out = BTreeMap::new();
        let Some((seg_index, entry)) = self.blkdir.get_entry_for_partial_scan(blkno, column_group)? else {
            return Ok(out);
        };
        let seginfo = &self.blkdir.seginfos()[seg_index];
        if seginfo.is_awaiting_drop() {
            return Ok(out);
        }
        let segno = seginfo.segno;
        let eof = seginfo.eof_for(column_group);

        let path = segment_file_path(self.db.config().data_dir(), self.rel.relid, column_group, segno);
        let mut reader = SegmentFileReader::open(&path, eof).map_err(|e| file_error(&self.rel, segno, None, e))?;
        for item in reader.blocks_from(entry.file_offset, eof) {
            let (_, block) = item.map_err(|e| file_error(&self.rel, segno, Some(start_row), e))?;
            if block.first_row_num >= end_row {
                break;
            }
            for (i, value) in block.rows.into_iter().enumerate() {
                let row = block.first_row_num + i as RowNum;
                if (start_row..end_row).contains(&row) {
                    out.insert(row, value);
                }
            }
        }
        Ok(out)
    }
}

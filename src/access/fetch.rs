use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::trace;

use crate::access::file_error;
use crate::access::visimap::{AllVisible, Visimap};
use crate::blockdir::{BlockDirectory, DirectoryEntry};
use crate::db::Database;
use crate::error::Result;
use crate::storage::catalog::AoRelation;
use crate::storage::files::{Block, SegmentFileReader, segment_file_path};
use crate::txn::{Snapshot, Transaction};
use crate::types::{AoTupleId, RowNum, SegNo};

/// Block a column group read last, kept for neighbouring fetches
struct CurrentBlock {
    segno: SegNo,
    entry: DirectoryEntry,
    block: Block,
}

/// Point lookups of rows by tuple id, as an index scan does them
pub struct FetchSession<'a> {
    db: &'a Database,
    rel: AoRelation,
    blkdir: BlockDirectory<'a>,
    visimap: Box<dyn Visimap + 'a>,
    projection: Vec<usize>,
    readers: HashMap<(SegNo, usize), SegmentFileReader>,
    current: Vec<Option<CurrentBlock>>,
}

impl<'a> FetchSession<'a> {
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
        Ok(FetchSession {
            db,
            rel: rel.clone(),
            blkdir,
            visimap: Box::new(AllVisible),
            projection,
            readers: HashMap::new(),
            current: (0..rel.num_column_groups()).map(|_| None).collect(),
        })
    }

    pub fn with_visimap(mut self, visimap: Box<dyn Visimap + 'a>) -> Self {
        self.visimap = visimap;
        self
    }

    /// Values of the projected column groups of `tid`, or `None` when the
    /// row is not visible: never committed, deleted, or in a segment that
    /// is gone or awaiting drop.
    pub fn fetch(&mut self, tid: AoTupleId) -> Result<Option<Vec<Vec<u8>>>> {
        let AoTupleId { segno, row_num } = tid;
        let Some(seginfo) = self.blkdir.seginfos().iter().find(|info| info.segno == segno) else {
            return Ok(None);
        };
        if seginfo.is_awaiting_drop() {
            trace!(%tid, "fetch from segment awaiting drop");
            return Ok(None);
        }
        if row_num < 1 || row_num > self.db.fast_sequence().read_last(self.rel.relid, segno) {
            return Ok(None);
        }
        if !self.visimap.is_visible(tid) {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(self.projection.len());
        for cg in self.projection.clone() {
            match self.fetch_value(tid, cg)? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    fn fetch_value(&mut self, tid: AoTupleId, column_group: usize) -> Result<Option<Vec<u8>>> {
        let AoTupleId { segno, row_num } = tid;
        if let Some(current) = &self.current[column_group] {
            if current.segno == segno && current.block.contains(row_num) {
                return Ok(current.block.row(row_num).map(<[u8]>::to_vec));
            }
        }

        let Some(entry) = self.blkdir.get_entry(tid, column_group)? else {
            return Ok(None);
        };
        let Some(block) = self.find_block(&entry, row_num)? else {
            return Ok(None);
        };
        let value = block.row(row_num).map(<[u8]>::to_vec);
        self.current[column_group] = Some(CurrentBlock { segno, entry, block });
        Ok(value)
    }

    /// Read the blocks of `entry` until the one holding `row_num`
    fn find_block(&mut self, entry: &DirectoryEntry, row_num: RowNum) -> Result<Option<Block>> {
        let segno = entry.segno;
        let cg = entry.column_group_no;
        let reader = match self.readers.entry((segno, cg)) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let eof = self
                    .blkdir
                    .seginfos()
                    .iter()
                    .find(|info| info.segno == segno)
                    .map(|info| info.eof_for(cg))
                    .unwrap_or(0);
                let path = segment_file_path(self.db.config().data_dir(), self.rel.relid, cg, segno);
                let reader =
                    SegmentFileReader::open(&path, eof).map_err(|err| file_error(&self.rel, segno, None, err))?;
                e.insert(reader)
            }
        };
        for item in reader.blocks_from(entry.file_offset, entry.after_file_offset) {
            let (_, block) = item.map_err(|e| file_error(&self.rel, segno, Some(row_num), e))?;
            if block.contains(row_num) {
                return Ok(Some(block));
            }
            if block.first_row_num > row_num {
                break;
            }
        }
        Ok(None)
    }

    /// Entry backing the block read last for `column_group`
    pub fn current_entry(&self, column_group: usize) -> Option<&DirectoryEntry> {
        self.current.get(column_group)?.as_ref().map(|c| &c.entry)
    }
}

use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Relation identifier
pub type RelId = u32;

/// Segment file number within a relation
pub type SegNo = i32;

/// Logical row number within a segment (starts at 1)
pub type RowNum = i64;

/// Transaction id
pub type Xid = u64;

/// Command id within a transaction
pub type CommandId = u32;

/// Highest segment file number a relation may use
pub const MAX_SEGNO: SegNo = 127;

/// Segment 0 is reserved for utility-mode inserts and always has a sequence record
pub const RESERVED_SEGNO: SegNo = 0;

/// Segment files per column; column c, segment s lives in file `c * 128 + s`
pub const SEGMENT_FILES_PER_COLUMN: i32 = MAX_SEGNO + 1;

/// Largest row number representable in a tuple id (40 bits)
pub const MAX_ROW_NUM: RowNum = (1 << 40) - 1;

/// Row numbers covered by one heap block number in bitmap scans
pub const ROWS_PER_HEAP_BLOCK: RowNum = 1 << 15;

const HEAP_BLOCK_SEGNO_SHIFT: u32 = 25;
const HEAP_BLOCK_LOW_MASK: u32 = (1 << HEAP_BLOCK_SEGNO_SHIFT) - 1;

/// Latest segment file format version
pub const FORMAT_VERSION_LATEST: i16 = 2;

/// Orientation of an append-only relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Orientation {
    /// One segment file per segno holding whole rows
    Row,
    /// One segment file per (column, segno)
    Column,
}

/// Segment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum SegmentState {
    Default,
    /// Compacted away, waiting to be truncated and reused
    AwaitingDrop,
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentState::Default => write!(f, "DEFAULT"),
            SegmentState::AwaitingDrop => write!(f, "AWAITING_DROP"),
        }
    }
}

/// Append-only tuple id: segment file number plus row number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct AoTupleId {
    pub segno: SegNo,
    pub row_num: RowNum,
}

impl AoTupleId {
    pub fn new(segno: SegNo, row_num: RowNum) -> Self {
        AoTupleId { segno, row_num }
    }

    /// Heap block number this tuple falls in for bitmap scans
    pub fn heap_block(&self) -> u32 {
        ((self.segno as u32) << HEAP_BLOCK_SEGNO_SHIFT)
            | ((self.row_num / ROWS_PER_HEAP_BLOCK) as u32 & HEAP_BLOCK_LOW_MASK)
    }
}

impl fmt::Display for AoTupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.segno, self.row_num)
    }
}

/// Segment number encoded in a heap block number
pub fn heap_block_segno(blkno: u32) -> SegNo {
    (blkno >> HEAP_BLOCK_SEGNO_SHIFT) as SegNo
}

/// First row number covered by a heap block number
pub fn heap_block_start_row(blkno: u32) -> RowNum {
    ((blkno & HEAP_BLOCK_LOW_MASK) as RowNum) * ROWS_PER_HEAP_BLOCK
}

/// Physical file number of a (column, segno) pair
pub fn file_number(column: usize, segno: SegNo) -> i32 {
    column as i32 * SEGMENT_FILES_PER_COLUMN + segno
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_block_round_trip() {
        let tid = AoTupleId::new(3, 100_000);
        let blkno = tid.heap_block();
        assert_eq!(heap_block_segno(blkno), 3);
        let start = heap_block_start_row(blkno);
        assert!(start <= 100_000 && 100_000 < start + ROWS_PER_HEAP_BLOCK);
    }

    #[test]
    fn file_numbers_do_not_collide() {
        assert_eq!(file_number(0, 5), 5);
        assert_eq!(file_number(1, 0), 128);
        assert_eq!(file_number(2, 127), 383);
    }
}

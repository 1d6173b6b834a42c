use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blockdir::minipage::Minipage;
use crate::types::{RowNum, SegNo};

/// Resolved directory entry: a byte range of a segment file and the row
/// range stored in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub segno: SegNo,
    pub column_group_no: usize,
    pub file_offset: i64,
    pub first_row_num: RowNum,
    /// Offset where the next entry (or the committed EOF) starts
    pub after_file_offset: i64,
    pub last_row_num: RowNum,
}

impl DirectoryEntry {
    pub fn range_has_row(&self, row_num: RowNum) -> bool {
        self.first_row_num <= row_num && row_num <= self.last_row_num
    }

    pub fn byte_len(&self) -> i64 {
        self.after_file_offset - self.file_offset
    }
}

/// Turn entry `entry_no` of `minipage` into a byte range clamped to `eof`.
///
/// Returns `None` when the entry points past `eof`, which happens for
/// entries left behind by an insert whose EOF update never committed.
/// With a nonzero `min_range` the last entry is open-ended.
pub fn resolve_range(
    minipage: &Minipage,
    entry_no: usize,
    segno: SegNo,
    column_group_no: usize,
    eof: i64,
    min_range: i64,
) -> Option<DirectoryEntry> {
    let entry = minipage.entries.get(entry_no)?;
    if entry.file_offset > eof {
        debug!(
            segno,
            column_group_no,
            file_offset = entry.file_offset,
            eof,
            "directory entry lies past the segment eof"
        );
        return None;
    }

    let is_last = entry_no + 1 == minipage.len();
    let after_file_offset = if is_last {
        eof
    } else {
        minipage.entries[entry_no + 1].file_offset.min(eof)
    };
    let last_row_num = if is_last && min_range != 0 {
        i64::MAX
    } else {
        entry.first_row_num + entry.row_count - 1
    };

    Some(DirectoryEntry {
        segno,
        column_group_no,
        file_offset: entry.file_offset,
        first_row_num: entry.first_row_num,
        after_file_offset,
        last_row_num,
    })
}

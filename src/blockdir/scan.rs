use tracing::trace;

use crate::blockdir::minipage::Minipage;
use crate::blockdir::{BlkDirRow, BlockDirectory, DirectoryMode, decode_minipage, key_range};
use crate::error::{Error, Result};
use crate::types::{RowNum, SegNo};

struct ScanCursor {
    segno: SegNo,
    column_group: usize,
    rows: std::vec::IntoIter<BlkDirRow>,
    minipage: Minipage,
    /// Entry the next lookup resumes at; `None` means read the next minipage
    entry_no: Option<usize>,
}

/// Forward walk over the minipages of one (segno, column group), turning
/// logical row ordinals into row numbers. Used by sampling scans that pick
/// the n-th live row of a segment.
pub struct BlockDirectoryScan<'d, 'a> {
    dir: &'d BlockDirectory<'a>,
    cursor: Option<ScanCursor>,
}

impl<'d, 'a> BlockDirectoryScan<'d, 'a> {
    pub fn new(dir: &'d BlockDirectory<'a>) -> Result<Self> {
        dir.require_directory("directory scan")?;
        dir.require_mode("directory scan", &[DirectoryMode::Search])?;
        Ok(BlockDirectoryScan { dir, cursor: None })
    }

    fn open_cursor(&self, segno: SegNo, column_group: usize) -> Result<ScanCursor> {
        let dir = self.dir;
        let Some(snapshot) = dir.snapshot.as_ref() else {
            return Err(Error::Configuration("directory has no snapshot".to_string()));
        };
        let rows: Vec<BlkDirRow> = dir
            .catalog
            .blkdir
            .read()
            .scan(key_range(dir.rel.relid, segno, column_group, RowNum::MAX), snapshot, dir.mgr())
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        trace!(relid = dir.rel.relid, segno, column_group, minipages = rows.len(), "directory scan opened");
        Ok(ScanCursor {
            segno,
            column_group,
            rows: rows.into_iter(),
            minipage: Minipage::default(),
            entry_no: None,
        })
    }

    /// Row number of the `target_row`-th row (0-based) of the segment.
    ///
    /// `start_row` is the ordinal of the first row of the entry the walk
    /// stands at; the caller keeps it between calls and passes ascending
    /// targets. Returns `None` once the segment is exhausted.
    pub fn row_num(
        &mut self,
        segno: SegNo,
        column_group: usize,
        target_row: i64,
        start_row: &mut i64,
    ) -> Result<Option<RowNum>> {
        self.dir.check_column_group(column_group)?;
        let reopen = self
            .cursor
            .as_ref()
            .is_none_or(|c| c.segno != segno || c.column_group != column_group);
        if reopen {
            self.cursor = Some(self.open_cursor(segno, column_group)?);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        loop {
            let start = match cursor.entry_no {
                Some(i) => i,
                None => match cursor.rows.next() {
                    Some(row) => {
                        cursor.minipage = decode_minipage(&self.dir.rel, &row, target_row, self.dir.minipage_size)?;
                        0
                    }
                    None => {
                        self.cursor = None;
                        return Ok(None);
                    }
                },
            };

            for i in start..cursor.minipage.len() {
                let entry = cursor.minipage.entries[i];
                if *start_row + entry.row_count - 1 >= target_row {
                    cursor.entry_no = Some(i);
                    return Ok(Some(entry.first_row_num + (target_row - *start_row)));
                }
                *start_row += entry.row_count;
            }
            cursor.entry_no = None;
        }
    }
}

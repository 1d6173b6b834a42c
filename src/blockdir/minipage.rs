//! Minipages: bounded arrays of directory entries, one catalog row each.
//!
//! Stored layout (little endian):
//!
//! ```text
//! +-------+---------+---------+----------------------------------------+
//! |  len  | version | n_entry | entries: (first_row, offset, rows) * n |
//! |  i32  |   i32   |   u32   |            i64, i64, i64               |
//! +-------+---------+---------+----------------------------------------+
//! ```
//!
//! `len` is the byte length of the whole record.

use crate::error::{Error, Result};
use crate::storage::index::RowId;
use crate::types::{RowNum, SegNo};

pub const MINIPAGE_VERSION: i32 = 1;

const HEADER_SIZE: usize = 12;
const ENTRY_SIZE: usize = 24;

/// One data block (or a run of blocks) of a segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinipageEntry {
    pub first_row_num: RowNum,
    pub file_offset: i64,
    pub row_count: i64,
}

impl MinipageEntry {
    /// One past the last row this entry claims
    pub fn end_row(&self) -> RowNum {
        self.first_row_num.saturating_add(self.row_count)
    }

    pub fn covers(&self, row_num: RowNum) -> bool {
        self.first_row_num <= row_num && row_num < self.end_row()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Minipage {
    pub entries: Vec<MinipageEntry>,
}

impl Minipage {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&MinipageEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&MinipageEntry> {
        self.entries.last()
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = HEADER_SIZE + self.entries.len() * ENTRY_SIZE;
        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(len as i32).to_le_bytes());
        buf.extend_from_slice(&MINIPAGE_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.first_row_num.to_le_bytes());
            buf.extend_from_slice(&entry.file_offset.to_le_bytes());
            buf.extend_from_slice(&entry.row_count.to_le_bytes());
        }
        buf
    }

    /// Decode a stored minipage holding at most `capacity` entries
    pub fn decode(data: &[u8], capacity: usize) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Codec(format!("minipage of {} bytes is too short", data.len())));
        }
        let len = i32::from_le_bytes(read4(data, 0)) as usize;
        let version = i32::from_le_bytes(read4(data, 4));
        let n_entry = u32::from_le_bytes(read4(data, 8)) as usize;

        if version != MINIPAGE_VERSION {
            return Err(Error::Codec(format!("unknown minipage version {}", version)));
        }
        if len != data.len() || len != HEADER_SIZE + n_entry * ENTRY_SIZE {
            return Err(Error::Codec(format!(
                "minipage length {} does not match {} bytes holding {} entries",
                len,
                data.len(),
                n_entry
            )));
        }
        if n_entry > capacity {
            return Err(Error::Codec(format!(
                "minipage holds {} entries, more than the {} allowed",
                n_entry, capacity
            )));
        }

        let entries = data[HEADER_SIZE..]
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| MinipageEntry {
                first_row_num: i64::from_le_bytes(read8(chunk, 0)),
                file_offset: i64::from_le_bytes(read8(chunk, 8)),
                row_count: i64::from_le_bytes(read8(chunk, 16)),
            })
            .collect();
        Ok(Minipage { entries })
    }

    /// Index of the first entry that breaks ascending, non-overlapping order
    pub fn find_disorder(&self) -> Option<usize> {
        self.entries
            .windows(2)
            .position(|w| w[1].first_row_num < w[0].end_row() || w[1].file_offset < w[0].file_offset)
            .map(|i| i + 1)
    }
}

fn read4(data: &[u8], at: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&data[at..at + 4]);
    out
}

fn read8(data: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[at..at + 8]);
    out
}

/// The in-memory minipage of one column group plus where it came from
#[derive(Debug, Clone, Default)]
pub struct MinipageSlot {
    /// Segment the minipage belongs to; `None` when nothing is loaded
    pub segno: Option<SegNo>,
    pub minipage: Minipage,
    /// Catalog row this minipage was read from or last written to
    pub row_id: Option<RowId>,
    /// Entry of the last successful lookup
    pub cached_entry_no: Option<usize>,
}

impl MinipageSlot {
    pub fn loaded(segno: SegNo, minipage: Minipage, row_id: RowId) -> Self {
        MinipageSlot {
            segno: Some(segno),
            minipage,
            row_id: Some(row_id),
            cached_entry_no: None,
        }
    }

    pub fn load(&mut self, segno: SegNo, minipage: Minipage, row_id: RowId) {
        self.segno = Some(segno);
        self.minipage = minipage;
        self.row_id = Some(row_id);
        self.cached_entry_no = None;
    }

    /// Empty the minipage, keeping the segment it belongs to
    pub fn clear(&mut self) {
        self.minipage.entries.clear();
        self.row_id = None;
        self.cached_entry_no = None;
    }

    /// Entry covering `row_num`: the cached entry first, then a binary search
    pub fn find_entry(&mut self, row_num: RowNum) -> Option<usize> {
        let entries = &self.minipage.entries;
        if let Some(i) = self.cached_entry_no {
            if entries.get(i).is_some_and(|e| e.covers(row_num)) {
                return Some(i);
            }
        }

        let after = entries.partition_point(|e| e.first_row_num <= row_num);
        if after == 0 {
            return None;
        }
        let i = after - 1;
        if entries[i].covers(row_num) {
            self.cached_entry_no = Some(i);
            Some(i)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(first_row_num: RowNum, file_offset: i64, row_count: i64) -> MinipageEntry {
        MinipageEntry { first_row_num, file_offset, row_count }
    }

    fn slot(entries: Vec<MinipageEntry>) -> MinipageSlot {
        MinipageSlot {
            minipage: Minipage { entries },
            ..Default::default()
        }
    }

    #[test]
    fn encoding_layout() {
        let mp = Minipage { entries: vec![entry(1, 0, 40), entry(41, 4096, 40)] };
        let bytes = mp.encode();
        assert_eq!(bytes.len(), 12 + 2 * 24);
        assert_eq!(&bytes[0..4], &(60i32).to_le_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(Minipage::decode(&bytes, 33).unwrap(), mp);
    }

    #[test]
    fn decode_rejects_bad_records() {
        let mp = Minipage { entries: vec![entry(1, 0, 1); 4] };
        let bytes = mp.encode();
        assert!(Minipage::decode(&bytes, 3).is_err());
        assert!(Minipage::decode(&bytes[..bytes.len() - 1], 33).is_err());
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(Minipage::decode(&wrong_version, 33).is_err());
        assert!(Minipage::decode(&[0u8; 5], 33).is_err());
    }

    #[test]
    fn find_entry_with_holes() {
        let mut s = slot(vec![entry(1, 0, 50), entry(100, 8192, 51)]);
        assert_eq!(s.find_entry(1), Some(0));
        assert_eq!(s.find_entry(50), Some(0));
        assert_eq!(s.find_entry(51), None);
        assert_eq!(s.find_entry(75), None);
        assert_eq!(s.find_entry(150), Some(1));
        assert_eq!(s.find_entry(151), None);
        assert_eq!(s.find_entry(0), None);
    }

    #[test]
    fn cached_entry_is_reused() {
        let mut s = slot(vec![entry(1, 0, 10), entry(11, 100, 10), entry(21, 200, 10)]);
        assert_eq!(s.find_entry(15), Some(1));
        assert_eq!(s.cached_entry_no, Some(1));
        assert_eq!(s.find_entry(12), Some(1));
        assert_eq!(s.find_entry(25), Some(2));
        assert_eq!(s.cached_entry_no, Some(2));
    }

    #[test]
    fn placeholder_entry_covers_to_the_top() {
        let mut s = slot(vec![entry(500, 0, crate::types::MAX_ROW_NUM)]);
        assert_eq!(s.find_entry(500), Some(0));
        assert_eq!(s.find_entry(crate::types::MAX_ROW_NUM), Some(0));
    }

    #[test]
    fn disorder_is_detected() {
        let ok = Minipage { entries: vec![entry(1, 0, 10), entry(20, 100, 5)] };
        assert_eq!(ok.find_disorder(), None);
        let overlap = Minipage { entries: vec![entry(1, 0, 10), entry(5, 100, 5)] };
        assert_eq!(overlap.find_disorder(), Some(1));
    }
}

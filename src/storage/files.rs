//! Segment data files: a sequence of self-describing blocks appended at the
//! committed EOF.
//!
//! Block layout (little endian):
//!
//! ```text
//! +-------+---------+-------+-----------+-------------+-----------+-------+---------+
//! | magic | version | flags | row_count | payload_len | first_row | crc32 | padding |
//! |  u32  |   u16   |  u16  |    u32    |     u32     |    i64    |  u32  |   u32   |
//! +-------+---------+-------+-----------+-------------+-----------+-------+---------+
//! ```
//!
//! followed by `payload_len` bytes of bincode-encoded rows. The CRC covers
//! the payload.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Result, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::{RelId, RowNum, SegNo, file_number};

const BLOCK_MAGIC: u32 = 0x414F424B; // "AOBK"
const BLOCK_VERSION: u16 = 1;
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Path of the file backing (column, segno) of a relation
pub fn segment_file_path(data_dir: &Path, relid: RelId, column: usize, segno: SegNo) -> PathBuf {
    data_dir.join(format!("{}.{}", relid, file_number(column, segno)))
}

/// Cut a segment file back to zero length, if it exists
pub fn truncate_segment_file(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).open(path) {
        Ok(file) => {
            file.set_len(0)?;
            file.sync_all()?;
            debug!(path = %path.display(), "segment file truncated");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a segment file, if it exists
pub fn remove_segment_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// A decoded data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub first_row_num: RowNum,
    pub rows: Vec<Vec<u8>>,
}

impl Block {
    pub fn row_count(&self) -> i64 {
        self.rows.len() as i64
    }

    pub fn last_row_num(&self) -> RowNum {
        self.first_row_num + self.row_count() - 1
    }

    pub fn contains(&self, row_num: RowNum) -> bool {
        self.first_row_num <= row_num && row_num <= self.last_row_num()
    }

    pub fn row(&self, row_num: RowNum) -> Option<&[u8]> {
        if !self.contains(row_num) {
            return None;
        }
        self.rows.get((row_num - self.first_row_num) as usize).map(Vec::as_slice)
    }
}

struct BlockHeader {
    row_count: u32,
    payload_len: u32,
    first_row: i64,
    crc32: u32,
}

impl BlockHeader {
    fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&BLOCK_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.row_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.first_row.to_le_bytes());
        buf[24..28].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; BLOCK_HEADER_SIZE], offset: i64) -> Result<Self> {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let magic = u32_at(0);
        if magic != BLOCK_MAGIC {
            return Err(invalid(format!("bad block magic {:#x} at offset {}", magic, offset)));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != BLOCK_VERSION {
            return Err(invalid(format!("unknown block version {} at offset {}", version, offset)));
        }
        let mut first_row = [0u8; 8];
        first_row.copy_from_slice(&buf[16..24]);
        Ok(BlockHeader {
            row_count: u32_at(8),
            payload_len: u32_at(12),
            first_row: i64::from_le_bytes(first_row),
            crc32: u32_at(24),
        })
    }
}

/// Appends blocks to one segment file
pub struct SegmentFileWriter {
    file: File,
    path: PathBuf,
    eof: i64,
    fsync: bool,
}

impl SegmentFileWriter {
    /// Open `path` for appending at `logical_eof`, the last committed EOF.
    /// Bytes past it were written by an insert that never committed and are
    /// cut off.
    pub fn open_for_append<P: AsRef<Path>>(path: P, logical_eof: i64, fsync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        let len = file.metadata()?.len() as i64;
        if len < logical_eof {
            return Err(invalid(format!(
                "segment file {} is {} bytes, shorter than its eof {}",
                path.display(),
                len,
                logical_eof
            )));
        }
        if len > logical_eof {
            warn!(path = %path.display(), len, eof = logical_eof, "discarding bytes past committed eof");
            file.set_len(logical_eof as u64)?;
        }
        file.seek(SeekFrom::Start(logical_eof as u64))?;
        Ok(SegmentFileWriter {
            file,
            path,
            eof: logical_eof,
            fsync,
        })
    }

    /// Append one block holding rows `first_row_num..` and return its offset
    pub fn append_block(&mut self, first_row_num: RowNum, rows: &[Vec<u8>]) -> Result<i64> {
        let payload = bincode::encode_to_vec(rows, bincode::config::standard())
            .map_err(|e| invalid(e.to_string()))?;
        let header = BlockHeader {
            row_count: rows.len() as u32,
            payload_len: payload.len() as u32,
            first_row: first_row_num,
            crc32: crc32fast::hash(&payload),
        };
        let offset = self.eof;
        self.file.write_all(&header.encode())?;
        self.file.write_all(&payload)?;
        self.eof += (BLOCK_HEADER_SIZE + payload.len()) as i64;
        Ok(offset)
    }

    /// Make every appended block durable; returns the new EOF
    pub fn flush(&mut self) -> Result<i64> {
        self.file.flush()?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(self.eof)
    }

    pub fn eof(&self) -> i64 {
        self.eof
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads blocks of one segment file below a committed EOF
pub struct SegmentFileReader {
    file: File,
    path: PathBuf,
    eof: i64,
}

impl SegmentFileReader {
    pub fn open<P: AsRef<Path>>(path: P, eof: i64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as i64;
        if len < eof {
            return Err(invalid(format!(
                "segment file {} is {} bytes, shorter than its eof {}",
                path.display(),
                len,
                eof
            )));
        }
        Ok(SegmentFileReader { file, path, eof })
    }

    pub fn eof(&self) -> i64 {
        self.eof
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the block starting at `offset`; returns it with the offset of
    /// the block after it
    pub fn read_block(&mut self, offset: i64) -> Result<(Block, i64)> {
        if offset < 0 || offset + BLOCK_HEADER_SIZE as i64 > self.eof {
            return Err(invalid(format!(
                "block offset {} outside eof {} of {}",
                offset,
                self.eof,
                self.path.display()
            )));
        }
        self.file.seek(SeekFrom::Start(offset as u64))?;
        let mut head = [0u8; BLOCK_HEADER_SIZE];
        self.file.read_exact(&mut head)?;
        let header = BlockHeader::decode(&head, offset)?;

        let next = offset + (BLOCK_HEADER_SIZE as i64) + header.payload_len as i64;
        if next > self.eof {
            return Err(invalid(format!(
                "block at offset {} runs past eof {}",
                offset, self.eof
            )));
        }
        let mut payload = vec![0u8; header.payload_len as usize];
        self.file.read_exact(&mut payload)?;
        let crc = crc32fast::hash(&payload);
        if crc != header.crc32 {
            return Err(invalid(format!(
                "block checksum mismatch at offset {}: expected {}, got {}",
                offset, header.crc32, crc
            )));
        }
        let (rows, _): (Vec<Vec<u8>>, usize) =
            bincode::decode_from_slice(&payload, bincode::config::standard())
                .map_err(|e| invalid(e.to_string()))?;
        if rows.len() != header.row_count as usize {
            return Err(invalid(format!(
                "block at offset {} holds {} rows, header says {}",
                offset,
                rows.len(),
                header.row_count
            )));
        }
        Ok((
            Block {
                first_row_num: header.first_row,
                rows,
            },
            next,
        ))
    }

    /// Blocks starting in `[offset, end)`, with their offsets
    pub fn blocks_from(&mut self, offset: i64, end: i64) -> BlockIter<'_> {
        let end = end.min(self.eof);
        BlockIter {
            reader: self,
            next: offset,
            end,
        }
    }
}

pub struct BlockIter<'a> {
    reader: &'a mut SegmentFileReader,
    next: i64,
    end: i64,
}

impl Iterator for BlockIter<'_> {
    type Item = Result<(i64, Block)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let offset = self.next;
        match self.reader.read_block(offset) {
            Ok((block, next)) => {
                self.next = next;
                Some(Ok((offset, block)))
            }
            Err(e) => {
                self.next = self.end;
                Some(Err(e))
            }
        }
    }
}

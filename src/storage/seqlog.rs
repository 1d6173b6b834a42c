//! Append-only log backing the fast sequence counters.
//!
//! Entry layout (little endian):
//!
//! ```text
//! +-------+------+----------+-------------+-----+-------+---------+
//! | magic | type | reserved | payload_len | lsn | crc32 | payload |
//! |  u32  |  u8  |  [u8; 3] |     u32     | u64 |  u32  | bincode |
//! +-------+------+----------+-------------+-----+-------+---------+
//! ```
//!
//! The crc covers the header (with the crc field zeroed) and the payload.
//! A torn or corrupt tail is cut off when the log is opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use tracing::{debug, warn};

use crate::types::{RelId, SegNo};

const MAGIC: u32 = 0x5351_4C47; // "SQLG"
const HEADER_SIZE: usize = 24;

/// Sequence log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqEntryType {
    /// New last_sequence for (objid, objmod)
    Set = 1,
    /// Forget every counter of objid
    Remove = 2,
}

impl SeqEntryType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(SeqEntryType::Set),
            2 => Some(SeqEntryType::Remove),
            _ => None,
        }
    }
}

/// Payload of one log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SeqRecord {
    pub objid: RelId,
    pub objmod: SegNo,
    pub last_sequence: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqEntry {
    pub entry_type: SeqEntryType,
    pub lsn: u64,
    pub record: SeqRecord,
}

fn encode_entry(entry_type: SeqEntryType, lsn: u64, record: &SeqRecord) -> io::Result<Vec<u8>> {
    let payload = bincode::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.push(entry_type as u8);
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = crc32fast::hash(&buf);
    buf[20..24].copy_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decode the entry at the start of `data`; `None` when it is torn or corrupt
fn decode_entry(data: &[u8]) -> Option<(SeqEntry, usize)> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    let magic = u32::from_le_bytes(data[0..4].try_into().ok()?);
    if magic != MAGIC {
        return None;
    }
    let entry_type = SeqEntryType::from_u8(data[4])?;
    let payload_len = u32::from_le_bytes(data[8..12].try_into().ok()?) as usize;
    let lsn = u64::from_le_bytes(data[12..20].try_into().ok()?);
    let stored_crc = u32::from_le_bytes(data[20..24].try_into().ok()?);
    let total = HEADER_SIZE + payload_len;
    if data.len() < total {
        return None;
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[..20]);
    hasher.update(&[0u8; 4]);
    hasher.update(&data[HEADER_SIZE..total]);
    if hasher.finalize() != stored_crc {
        return None;
    }

    let (record, _): (SeqRecord, usize) =
        bincode::decode_from_slice(&data[HEADER_SIZE..total], bincode::config::standard()).ok()?;
    Some((SeqEntry { entry_type, lsn, record }, total))
}

/// Append-only file of sequence entries
pub struct SeqLogFile {
    file: File,
    path: PathBuf,
    next_offset: u64,
    next_lsn: u64,
    fsync: bool,
}

impl SeqLogFile {
    /// Open or create the log, returning it with every intact entry
    pub fn open<P: AsRef<Path>>(path: P, fsync: bool) -> io::Result<(Self, Vec<SeqEntry>)> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            match decode_entry(&data[offset..]) {
                Some((entry, len)) => {
                    entries.push(entry);
                    offset += len;
                }
                None => break,
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if offset < data.len() {
            warn!(
                path = %path.display(),
                good_bytes = offset,
                dropped_bytes = data.len() - offset,
                "sequence log has a torn tail, truncating"
            );
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }

        let next_lsn = entries.last().map(|e| e.lsn + 1).unwrap_or(0);
        debug!(path = %path.display(), entries = entries.len(), "sequence log opened");

        let log = SeqLogFile {
            file,
            path,
            next_offset: offset as u64,
            next_lsn,
            fsync,
        };
        Ok((log, entries))
    }

    /// Append one entry and make it durable; returns its offset
    pub fn append(&mut self, entry_type: SeqEntryType, record: &SeqRecord) -> io::Result<u64> {
        let buf = encode_entry(entry_type, self.next_lsn, record)?;
        write_at_end(&mut self.file, self.next_offset, &buf)?;
        if self.fsync {
            self.file.sync_data()?;
        }
        let offset = self.next_offset;
        self.next_offset += buf.len() as u64;
        self.next_lsn += 1;
        Ok(offset)
    }

    /// Replace the log with one `Set` entry per record
    pub fn rewrite(&mut self, records: &[SeqRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("log.tmp");
        let mut bytes = Vec::new();
        for (lsn, record) in records.iter().enumerate() {
            bytes.extend_from_slice(&encode_entry(SeqEntryType::Set, lsn as u64, record)?);
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.next_offset = bytes.len() as u64;
        self.next_lsn = records.len() as u64;
        debug!(path = %self.path.display(), records = records.len(), "sequence log compacted");
        Ok(())
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_at_end(file: &mut File, offset: u64, buf: &[u8]) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

//! Row number allocation for append-only segments.
//!
//! Counters live outside the transactional catalog in their own log, so an
//! allocation stays consumed even when the allocating transaction aborts.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::storage::catalog::AoRelation;
use crate::storage::seqlog::{SeqEntryType, SeqLogFile, SeqRecord};
use crate::types::{MAX_ROW_NUM, RESERVED_SEGNO, RelId, RowNum, SegNo};

struct SeqState {
    log: SeqLogFile,
    counters: HashMap<(RelId, SegNo), i64>,
}

/// Non-transactional per-(relation, segno) row number counters
pub struct FastSequence {
    state: Mutex<SeqState>,
}

impl FastSequence {
    /// Open the counter log at `path`, replaying every entry
    pub fn open<P: AsRef<Path>>(path: P, fsync: bool) -> Result<Self> {
        let (log, entries) = SeqLogFile::open(path, fsync)?;
        let mut counters = HashMap::new();
        for entry in entries {
            let record = entry.record;
            match entry.entry_type {
                SeqEntryType::Set => {
                    counters.insert((record.objid, record.objmod), record.last_sequence);
                }
                SeqEntryType::Remove => counters.retain(|(objid, _), _| *objid != record.objid),
            }
        }
        debug!(counters = counters.len(), "fast sequences loaded");
        Ok(FastSequence {
            state: Mutex::new(SeqState { log, counters }),
        })
    }

    /// Seed the reserved segment's counter when a relation is created
    pub fn insert_initial_entries(&self, relid: RelId) -> Result<()> {
        let mut state = self.state.lock();
        if state.counters.contains_key(&(relid, RESERVED_SEGNO)) {
            return Ok(());
        }
        let record = SeqRecord {
            objid: relid,
            objmod: RESERVED_SEGNO,
            last_sequence: 0,
        };
        state.log.append(SeqEntryType::Set, &record)?;
        state.counters.insert((relid, RESERVED_SEGNO), 0);
        Ok(())
    }

    /// Reserve `count` row numbers for (relation, segno) and return the first.
    /// The reservation is durable before this returns.
    pub fn allocate(&self, rel: &AoRelation, segno: SegNo, count: i64) -> Result<RowNum> {
        if count <= 0 {
            return Err(Error::Configuration(format!(
                "cannot allocate {} row numbers for relation \"{}\" segno {}",
                count, rel.name, segno
            )));
        }
        let mut state = self.state.lock();
        let last = state.counters.get(&(rel.relid, segno)).copied().unwrap_or(0);
        let new_last = last
            .checked_add(count)
            .filter(|n| *n <= MAX_ROW_NUM)
            .ok_or_else(|| Error::RowNumberExhausted {
                table: rel.name.clone(),
                segno,
            })?;
        Self::write(&mut state, rel, segno, last, new_last)?;
        trace!(relid = rel.relid, segno, first = last + 1, last = new_last, "row numbers allocated");
        Ok(last + 1)
    }

    /// Move the counter forward to `last_sequence`
    pub fn set_last(&self, rel: &AoRelation, segno: SegNo, last_sequence: i64) -> Result<()> {
        let mut state = self.state.lock();
        let current = state.counters.get(&(rel.relid, segno)).copied().unwrap_or(0);
        Self::write(&mut state, rel, segno, current, last_sequence)
    }

    fn write(state: &mut SeqState, rel: &AoRelation, segno: SegNo, current: i64, new_last: i64) -> Result<()> {
        if new_last < current {
            return Err(Error::corruption(
                &rel.name,
                segno,
                Some(new_last),
                format!("fast sequence would move backwards from {} to {}", current, new_last),
            ));
        }
        let record = SeqRecord {
            objid: rel.relid,
            objmod: segno,
            last_sequence: new_last,
        };
        state.log.append(SeqEntryType::Set, &record)?;
        state.counters.insert((rel.relid, segno), new_last);
        Ok(())
    }

    /// Last allocated row number, 0 if nothing was ever allocated
    pub fn read_last(&self, relid: RelId, segno: SegNo) -> i64 {
        self.state.lock().counters.get(&(relid, segno)).copied().unwrap_or(0)
    }

    /// Forget every counter of a dropped relation
    pub fn remove_entries(&self, relid: RelId) -> Result<()> {
        let mut state = self.state.lock();
        let record = SeqRecord {
            objid: relid,
            objmod: RESERVED_SEGNO,
            last_sequence: 0,
        };
        state.log.append(SeqEntryType::Remove, &record)?;
        state.counters.retain(|(objid, _), _| *objid != relid);
        Ok(())
    }

    /// Rewrite the log with one entry per live counter
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut records: Vec<SeqRecord> = state
            .counters
            .iter()
            .map(|((objid, objmod), last)| SeqRecord {
                objid: *objid,
                objmod: *objmod,
                last_sequence: *last,
            })
            .collect();
        records.sort_by_key(|r| (r.objid, r.objmod));
        state.log.rewrite(&records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Orientation;

    fn rel() -> AoRelation {
        AoRelation {
            relid: 16384,
            name: "t".to_string(),
            orientation: Orientation::Row,
            num_columns: 1,
            has_block_directory: true,
        }
    }

    #[test]
    fn allocations_are_monotonic_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fastseq.log");
        let rel = rel();

        let seq = FastSequence::open(&path, false).unwrap();
        assert_eq!(seq.read_last(rel.relid, 3), 0);
        assert_eq!(seq.allocate(&rel, 3, 100).unwrap(), 1);
        assert_eq!(seq.allocate(&rel, 3, 100).unwrap(), 101);
        assert_eq!(seq.allocate(&rel, 4, 1).unwrap(), 1);
        drop(seq);

        let seq = FastSequence::open(&path, false).unwrap();
        assert_eq!(seq.read_last(rel.relid, 3), 200);
        assert_eq!(seq.allocate(&rel, 3, 1).unwrap(), 201);
    }

    #[test]
    fn regression_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let seq = FastSequence::open(dir.path().join("fastseq.log"), false).unwrap();
        let rel = rel();
        seq.allocate(&rel, 1, 50).unwrap();
        let err = seq.set_last(&rel, 1, 10).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("50"));
        seq.set_last(&rel, 1, 70).unwrap();
        assert_eq!(seq.read_last(rel.relid, 1), 70);
    }

    #[test]
    fn bad_counts_and_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let seq = FastSequence::open(dir.path().join("fastseq.log"), false).unwrap();
        let rel = rel();
        assert!(seq.allocate(&rel, 1, 0).unwrap_err().is_configuration());
        seq.set_last(&rel, 1, MAX_ROW_NUM - 1).unwrap();
        assert_eq!(seq.allocate(&rel, 1, 1).unwrap(), MAX_ROW_NUM);
        assert!(matches!(
            seq.allocate(&rel, 1, 1),
            Err(Error::RowNumberExhausted { .. })
        ));
    }

    #[test]
    fn initial_entries_remove_and_compact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fastseq.log");
        let rel = rel();
        let seq = FastSequence::open(&path, false).unwrap();
        seq.insert_initial_entries(rel.relid).unwrap();
        seq.allocate(&rel, RESERVED_SEGNO, 5).unwrap();
        // seeding again keeps the counter
        seq.insert_initial_entries(rel.relid).unwrap();
        assert_eq!(seq.read_last(rel.relid, RESERVED_SEGNO), 5);

        seq.allocate(&rel, 2, 10).unwrap();
        seq.compact().unwrap();
        seq.remove_entries(rel.relid).unwrap();
        drop(seq);

        let seq = FastSequence::open(&path, false).unwrap();
        assert_eq!(seq.read_last(rel.relid, 2), 0);
        assert_eq!(seq.read_last(rel.relid, RESERVED_SEGNO), 0);
    }
}

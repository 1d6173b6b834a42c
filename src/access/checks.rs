use tracing::trace;

use crate::access::visimap::{AllVisible, Visimap};
use crate::blockdir::BlockDirectory;
use crate::db::Database;
use crate::error::Result;
use crate::storage::catalog::AoRelation;
use crate::txn::{DirtySnapshot, Snapshot, Transaction};
use crate::types::{AoTupleId, Xid};

/// Outcome of a uniqueness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueCheck {
    /// A row with this tuple id exists or is being inserted
    pub conflict: bool,
    /// In-progress transaction that inserted the covering entry; the caller
    /// waits for it and checks again
    pub wait_for_insert: Option<Xid>,
    /// In-progress transaction that is deleting the covering entry
    pub wait_for_delete: Option<Xid>,
}

/// Answers "does this tuple id exist" for unique index inserts. Sees
/// committed rows, the caller's own rows and rows other transactions are
/// still inserting.
pub struct UniqueChecker<'a> {
    txn: &'a Transaction,
    blkdir: BlockDirectory<'a>,
    visimap: Box<dyn Visimap + 'a>,
}

impl<'a> UniqueChecker<'a> {
    pub fn new(db: &'a Database, txn: &'a Transaction, rel: &AoRelation) -> Result<Self> {
        let blkdir = BlockDirectory::init_for_unique_checks(db.catalog(), txn, rel, db.config())?;
        Ok(UniqueChecker {
            txn,
            blkdir,
            visimap: Box::new(AllVisible),
        })
    }

    pub fn with_visimap(mut self, visimap: Box<dyn Visimap + 'a>) -> Self {
        self.visimap = visimap;
        self
    }

    pub fn check(&mut self, tid: AoTupleId) -> Result<UniqueCheck> {
        let snapshot = Snapshot::Dirty(DirtySnapshot::new(self.txn.xid()));
        let covered = self.blkdir.unique_check(tid, &snapshot)?;
        let (wait_for_insert, wait_for_delete) = match &snapshot {
            Snapshot::Dirty(dirty) if covered => (dirty.in_progress_xmin(), dirty.in_progress_xmax()),
            _ => (None, None),
        };
        let conflict = covered && (wait_for_insert.is_some() || self.visimap.is_visible(tid));
        trace!(%tid, conflict, ?wait_for_insert, ?wait_for_delete, "unique check");
        Ok(UniqueCheck {
            conflict,
            wait_for_insert,
            wait_for_delete,
        })
    }

    /// Probe with the caller's own view only: committed rows plus its own
    pub fn check_own(&mut self, tid: AoTupleId) -> Result<bool> {
        let covered = self.blkdir.unique_check(tid, &self.txn.self_snapshot())?;
        Ok(covered && self.visimap.is_visible(tid))
    }
}

/// Decides whether an index entry may be answered without visiting the
/// row: the row must be covered by a directory entry visible to the scan's
/// snapshot and not deleted.
pub struct IndexOnlyChecker<'a> {
    blkdir: BlockDirectory<'a>,
    visimap: Box<dyn Visimap + 'a>,
}

impl<'a> IndexOnlyChecker<'a> {
    pub fn new(db: &'a Database, txn: &'a Transaction, rel: &AoRelation, snapshot: Snapshot) -> Result<Self> {
        let blkdir = BlockDirectory::init_for_index_only_scan(db.catalog(), txn, rel, db.config(), snapshot)?;
        Ok(IndexOnlyChecker {
            blkdir,
            visimap: Box::new(AllVisible),
        })
    }

    pub fn with_visimap(mut self, visimap: Box<dyn Visimap + 'a>) -> Self {
        self.visimap = visimap;
        self
    }

    pub fn is_visible(&mut self, tid: AoTupleId) -> Result<bool> {
        Ok(self.blkdir.covers_tuple(tid)? && self.visimap.is_visible(tid))
    }
}

pub mod lock;

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bincode::{Decode, Encode};
use parking_lot::Mutex;
use tracing::debug;

use crate::types::{CommandId, Xid};
use self::lock::LockManager;

/// Xid stamped on rows that are visible to every snapshot
pub const FROZEN_XID: Xid = 1;

const FIRST_NORMAL_XID: Xid = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactStatus {
    InProgress,
    Committed,
    Aborted,
}

struct XactTable {
    next_xid: Xid,
    status: HashMap<Xid, XactStatus>,
    /// Running transactions, each with the oldest xid still running when it began
    running: BTreeMap<Xid, Xid>,
}

/// Hands out transaction ids and tracks their outcome
pub struct TransactionManager {
    xacts: Mutex<XactTable>,
    locks: LockManager,
}

impl TransactionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionManager {
            xacts: Mutex::new(XactTable {
                next_xid: FIRST_NORMAL_XID,
                status: HashMap::new(),
                running: BTreeMap::new(),
            }),
            locks: LockManager::new(),
        })
    }

    pub fn begin(self: &Arc<Self>) -> Transaction {
        let mut xacts = self.xacts.lock();
        let xid = xacts.next_xid;
        xacts.next_xid += 1;
        xacts.status.insert(xid, XactStatus::InProgress);
        let oldest = xacts.running.keys().next().copied().unwrap_or(xid);
        xacts.running.insert(xid, oldest);
        debug!(xid, "transaction started");
        Transaction {
            xid,
            cid: Cell::new(0),
            finished: Cell::new(false),
            mgr: self.clone(),
        }
    }

    /// Outcome of `xid`. Ids this manager never handed out count as aborted.
    pub fn status(&self, xid: Xid) -> XactStatus {
        if xid == FROZEN_XID {
            return XactStatus::Committed;
        }
        self.xacts
            .lock()
            .status
            .get(&xid)
            .copied()
            .unwrap_or(XactStatus::Aborted)
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Transactions still running, excluding `own`
    pub fn in_progress(&self, own: Xid) -> HashSet<Xid> {
        self.xacts
            .lock()
            .running
            .keys()
            .filter(|xid| **xid != own)
            .copied()
            .collect()
    }

    /// Oldest xid any running transaction may still see as in progress.
    /// A transaction that committed below it is committed for every
    /// snapshot a running transaction can take.
    pub fn oldest_xmin(&self) -> Xid {
        let xacts = self.xacts.lock();
        xacts.running.values().min().copied().unwrap_or(xacts.next_xid)
    }

    fn mvcc_snapshot(&self, xid: Xid, cid: CommandId) -> MvccSnapshot {
        let xacts = self.xacts.lock();
        let in_progress = xacts.running.keys().filter(|x| **x != xid).copied().collect();
        MvccSnapshot {
            xid,
            cid,
            xmax: xacts.next_xid,
            in_progress,
        }
    }

    fn finish(&self, xid: Xid, status: XactStatus) {
        {
            let mut xacts = self.xacts.lock();
            xacts.status.insert(xid, status);
            xacts.running.remove(&xid);
        }
        self.locks.release_all(xid);
        debug!(xid, ?status, "transaction finished");
    }
}

/// A running transaction. Dropping it without `commit` aborts it.
pub struct Transaction {
    xid: Xid,
    cid: Cell<CommandId>,
    finished: Cell<bool>,
    mgr: Arc<TransactionManager>,
}

impl Transaction {
    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn command_id(&self) -> CommandId {
        self.cid.get()
    }

    /// Make this transaction's earlier changes visible to its later commands
    pub fn command_counter_increment(&self) {
        self.cid.set(self.cid.get() + 1);
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.mgr
    }

    /// Snapshot as of now, seeing own changes from earlier commands
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::Mvcc(self.mgr.mvcc_snapshot(self.xid, self.cid.get()))
    }

    pub fn self_snapshot(&self) -> Snapshot {
        Snapshot::SelfVisible { xid: self.xid }
    }

    pub fn dirty_snapshot(&self) -> Snapshot {
        Snapshot::Dirty(DirtySnapshot::new(self.xid))
    }

    pub fn commit(self) {
        self.finished.set(true);
        self.mgr.finish(self.xid, XactStatus::Committed);
    }

    pub fn abort(self) {
        self.finished.set(true);
        self.mgr.finish(self.xid, XactStatus::Aborted);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished.get() {
            self.mgr.finish(self.xid, XactStatus::Aborted);
        }
    }
}

/// Insert/delete stamps carried by every catalog row version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RowStamp {
    pub xmin: Xid,
    pub cmin: CommandId,
    pub xmax: Option<(Xid, CommandId)>,
}

impl RowStamp {
    pub fn inserted_by(xid: Xid, cid: CommandId) -> Self {
        RowStamp {
            xmin: xid,
            cmin: cid,
            xmax: None,
        }
    }

    pub fn frozen() -> Self {
        RowStamp::inserted_by(FROZEN_XID, 0)
    }
}

#[derive(Debug, Clone)]
pub struct MvccSnapshot {
    pub xid: Xid,
    pub cid: CommandId,
    /// First xid not yet assigned when the snapshot was taken
    pub xmax: Xid,
    pub in_progress: HashSet<Xid>,
}

impl MvccSnapshot {
    fn sees_committed(&self, xid: Xid, mgr: &TransactionManager) -> bool {
        xid == FROZEN_XID
            || (xid < self.xmax
                && !self.in_progress.contains(&xid)
                && mgr.status(xid) == XactStatus::Committed)
    }
}

/// Snapshot for uniqueness checks. Records the in-progress transactions
/// whose rows it let through so the caller can wait on them.
#[derive(Debug)]
pub struct DirtySnapshot {
    pub xid: Xid,
    xmin: Cell<Option<Xid>>,
    xmax: Cell<Option<Xid>>,
}

impl DirtySnapshot {
    pub fn new(xid: Xid) -> Self {
        DirtySnapshot {
            xid,
            xmin: Cell::new(None),
            xmax: Cell::new(None),
        }
    }

    /// In-progress inserter of the last row let through, if any
    pub fn in_progress_xmin(&self) -> Option<Xid> {
        self.xmin.get()
    }

    /// In-progress deleter of the last row let through, if any
    pub fn in_progress_xmax(&self) -> Option<Xid> {
        self.xmax.get()
    }

    pub fn reset(&self) {
        self.xmin.set(None);
        self.xmax.set(None);
    }
}

#[derive(Debug)]
pub enum Snapshot {
    Mvcc(MvccSnapshot),
    /// Own changes of every command plus whatever is committed right now
    SelfVisible { xid: Xid },
    /// Like `SelfVisible`, also letting through in-progress inserts
    Dirty(DirtySnapshot),
    /// Every row version
    Any,
}

impl Snapshot {
    pub fn is_mvcc(&self) -> bool {
        matches!(self, Snapshot::Mvcc(_))
    }

    pub fn is_visible(&self, stamp: &RowStamp, mgr: &TransactionManager) -> bool {
        match self {
            Snapshot::Mvcc(snap) => {
                let inserted = if stamp.xmin == snap.xid {
                    stamp.cmin < snap.cid
                } else {
                    snap.sees_committed(stamp.xmin, mgr)
                };
                if !inserted {
                    return false;
                }
                match stamp.xmax {
                    None => true,
                    Some((xmax, cmax)) if xmax == snap.xid => cmax >= snap.cid,
                    Some((xmax, _)) => !snap.sees_committed(xmax, mgr),
                }
            }
            Snapshot::SelfVisible { xid } => {
                let inserted = stamp.xmin == *xid
                    || mgr.status(stamp.xmin) == XactStatus::Committed;
                if !inserted {
                    return false;
                }
                match stamp.xmax {
                    None => true,
                    Some((xmax, _)) if xmax == *xid => false,
                    Some((xmax, _)) => mgr.status(xmax) != XactStatus::Committed,
                }
            }
            Snapshot::Dirty(dirty) => {
                let mut inserter = None;
                if stamp.xmin != dirty.xid {
                    match mgr.status(stamp.xmin) {
                        XactStatus::Aborted => return false,
                        XactStatus::InProgress => inserter = Some(stamp.xmin),
                        XactStatus::Committed => {}
                    }
                }
                let deleter = match stamp.xmax {
                    None => None,
                    Some((xmax, _)) if xmax == dirty.xid => return false,
                    Some((xmax, _)) => match mgr.status(xmax) {
                        XactStatus::Committed => return false,
                        XactStatus::InProgress => Some(xmax),
                        XactStatus::Aborted => None,
                    },
                };
                // only rows let through leave a trace
                dirty.xmin.set(inserter);
                dirty.xmax.set(deleter);
                true
            }
            Snapshot::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mvcc_hides_uncommitted_and_later_commands() {
        let mgr = TransactionManager::new();
        let t1 = mgr.begin();
        let stamp = RowStamp::inserted_by(t1.xid(), 0);

        assert!(!t1.snapshot().is_visible(&stamp, &mgr));
        t1.command_counter_increment();
        assert!(t1.snapshot().is_visible(&stamp, &mgr));

        let t2 = mgr.begin();
        let before_commit = t2.snapshot();
        assert!(!before_commit.is_visible(&stamp, &mgr));
        t1.commit();
        // taken before the commit, still blind to it
        assert!(!before_commit.is_visible(&stamp, &mgr));
        assert!(t2.snapshot().is_visible(&stamp, &mgr));
    }

    #[test]
    fn aborted_rows_vanish_frozen_rows_stay() {
        let mgr = TransactionManager::new();
        let t1 = mgr.begin();
        let row = RowStamp::inserted_by(t1.xid(), 0);
        t1.abort();

        let t2 = mgr.begin();
        assert!(!t2.self_snapshot().is_visible(&row, &mgr));
        assert!(t2.snapshot().is_visible(&RowStamp::frozen(), &mgr));
        assert!(Snapshot::Any.is_visible(&row, &mgr));
    }

    #[test]
    fn dirty_snapshot_reports_in_progress_inserter() {
        let mgr = TransactionManager::new();
        let writer = mgr.begin();
        let row = RowStamp::inserted_by(writer.xid(), 0);

        let checker = mgr.begin();
        let snapshot = checker.dirty_snapshot();
        assert!(snapshot.is_visible(&row, &mgr));
        match &snapshot {
            Snapshot::Dirty(dirty) => assert_eq!(dirty.in_progress_xmin(), Some(writer.xid())),
            _ => unreachable!(),
        }
        assert!(!checker.self_snapshot().is_visible(&row, &mgr));
    }

    #[test]
    fn dirty_snapshot_tracks_last_row_let_through() {
        let mgr = TransactionManager::new();
        let writer = mgr.begin();
        let pending = RowStamp::inserted_by(writer.xid(), 0);
        let checker = mgr.begin();
        let snapshot = checker.dirty_snapshot();
        let Snapshot::Dirty(dirty) = &snapshot else { unreachable!() };

        assert!(snapshot.is_visible(&pending, &mgr));
        assert!(snapshot.is_visible(&RowStamp::frozen(), &mgr));
        assert_eq!(dirty.in_progress_xmin(), None);

        // hidden rows leave the last answer alone
        assert!(snapshot.is_visible(&pending, &mgr));
        let mut own_delete = pending;
        own_delete.xmax = Some((checker.xid(), 0));
        assert!(!snapshot.is_visible(&own_delete, &mgr));
        assert_eq!(dirty.in_progress_xmin(), Some(writer.xid()));
    }

    #[test]
    fn oldest_xmin_follows_running_transactions() {
        let mgr = TransactionManager::new();
        let t1 = mgr.begin();
        let t2 = mgr.begin();
        assert_eq!(mgr.oldest_xmin(), t1.xid());

        t1.commit();
        // t2 began while t1 was running
        assert_eq!(mgr.oldest_xmin(), t2.xid() - 1);
        let t3 = mgr.begin();
        t2.commit();
        assert_eq!(mgr.oldest_xmin(), t3.xid() - 1);
        let next = t3.xid() + 1;
        t3.commit();
        assert_eq!(mgr.oldest_xmin(), next);
    }

    #[test]
    fn dropped_transaction_aborts_and_releases_locks() {
        let mgr = TransactionManager::new();
        let xid = {
            let t = mgr.begin();
            mgr.locks().lock_segment(t.xid(), 1, 1);
            t.xid()
        };
        assert_eq!(mgr.status(xid), XactStatus::Aborted);
        assert_eq!(mgr.locks().holder(1, 1), None);
    }
}

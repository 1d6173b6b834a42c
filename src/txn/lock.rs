use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::types::{RelId, SegNo, Xid};

/// Exclusive segment locks, held until the owning transaction ends.
///
/// One writer appends to a (relation, segno) at a time; catalog updates of a
/// segment row require the caller to hold its lock.
pub struct LockManager {
    held: Mutex<HashMap<(RelId, SegNo), Xid>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Block until the segment lock is ours. Re-acquiring is a no-op.
    pub fn lock_segment(&self, xid: Xid, relid: RelId, segno: SegNo) {
        let mut held = self.held.lock();
        loop {
            match held.get(&(relid, segno)) {
                Some(owner) if *owner == xid => return,
                Some(_) => self.released.wait(&mut held),
                None => {
                    held.insert((relid, segno), xid);
                    trace!(xid, relid, segno, "segment lock acquired");
                    return;
                }
            }
        }
    }

    /// Take the segment lock if nobody else holds it
    pub fn try_lock_segment(&self, xid: Xid, relid: RelId, segno: SegNo) -> bool {
        let mut held = self.held.lock();
        match held.get(&(relid, segno)) {
            Some(owner) => *owner == xid,
            None => {
                held.insert((relid, segno), xid);
                trace!(xid, relid, segno, "segment lock acquired");
                true
            }
        }
    }

    pub fn is_held_by(&self, relid: RelId, segno: SegNo, xid: Xid) -> bool {
        self.held.lock().get(&(relid, segno)) == Some(&xid)
    }

    pub fn holder(&self, relid: RelId, segno: SegNo) -> Option<Xid> {
        self.held.lock().get(&(relid, segno)).copied()
    }

    /// Drop every lock owned by `xid` and wake waiters
    pub fn release_all(&self, xid: Xid) {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|_, owner| *owner != xid);
        if held.len() != before {
            trace!(xid, released = before - held.len(), "segment locks released");
            self.released.notify_all();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

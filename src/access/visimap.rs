use std::collections::BTreeSet;

use crate::types::AoTupleId;

/// Per-row deletion state consulted after the block directory says a row
/// exists
pub trait Visimap {
    fn is_visible(&self, tid: AoTupleId) -> bool;
}

/// Nothing was ever deleted
#[derive(Debug, Clone, Copy, Default)]
pub struct AllVisible;

impl Visimap for AllVisible {
    fn is_visible(&self, _tid: AoTupleId) -> bool {
        true
    }
}

/// Deleted row ids kept in memory
#[derive(Debug, Clone, Default)]
pub struct DeletedRows {
    deleted: BTreeSet<AoTupleId>,
}

impl DeletedRows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `tid` deleted; false if it already was
    pub fn delete(&mut self, tid: AoTupleId) -> bool {
        self.deleted.insert(tid)
    }

    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}

impl Visimap for DeletedRows {
    fn is_visible(&self, tid: AoTupleId) -> bool {
        !self.deleted.contains(&tid)
    }
}

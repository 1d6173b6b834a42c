use std::fs;
use std::sync::Arc;

use tracing::{debug, info};

use crate::access::{BlockRangeScan, FetchSession, IndexOnlyChecker, InsertSession, UniqueChecker};
use crate::blockdir::BlockDirectory;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fastseq::FastSequence;
use crate::segfiles::SegmentFileCatalog;
use crate::storage::catalog::{AoRelation, Catalog};
use crate::storage::files::{remove_segment_file, segment_file_path, truncate_segment_file};
use crate::txn::{Snapshot, Transaction, TransactionManager};
use crate::types::{Orientation, SegNo};

const FASTSEQ_FILE: &str = "fastseq.log";

/// An append-only storage directory: catalog, row number counters and
/// segment data files
pub struct Database {
    config: Config,
    catalog: Catalog,
    txns: Arc<TransactionManager>,
    fastseq: FastSequence,
}

impl Database {
    /// Open or create the data directory named by `config`
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(config.data_dir())?;
        let catalog = Catalog::load(config.data_dir())?;
        let fastseq = FastSequence::open(config.data_dir().join(FASTSEQ_FILE), config.fsync)?;
        info!(
            dir = %config.data_dir().display(),
            relations = catalog.relations().len(),
            "database opened"
        );
        Ok(Database {
            config,
            catalog,
            txns: TransactionManager::new(),
            fastseq,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    pub fn fast_sequence(&self) -> &FastSequence {
        &self.fastseq
    }

    pub fn begin(&self) -> Transaction {
        self.txns.begin()
    }

    /// Create a relation and seed its row number counter
    pub fn create_relation(
        &self,
        name: &str,
        orientation: Orientation,
        num_columns: u32,
        block_directory: bool,
    ) -> Result<AoRelation> {
        let rel = self.catalog.add_relation(name, orientation, num_columns, block_directory)?;
        self.fastseq.insert_initial_entries(rel.relid)?;
        Ok(rel)
    }

    pub fn relation(&self, name: &str) -> Result<AoRelation> {
        self.catalog
            .relation_by_name(name)
            .ok_or_else(|| Error::Configuration(format!("relation \"{}\" does not exist", name)))
    }

    pub fn segfiles<'a>(&'a self, rel: &'a AoRelation) -> SegmentFileCatalog<'a> {
        SegmentFileCatalog::new(&self.catalog, &self.txns, rel)
    }

    /// Take the segment lock of (rel, segno) for `txn`, waiting for the holder
    pub fn lock_segment(&self, txn: &Transaction, rel: &AoRelation, segno: SegNo) {
        self.txns.locks().lock_segment(txn.xid(), rel.relid, segno);
    }

    pub fn insert_session<'a>(
        &'a self,
        txn: &'a Transaction,
        rel: &AoRelation,
        segno: SegNo,
        unique_index: bool,
    ) -> Result<InsertSession<'a>> {
        InsertSession::begin(self, txn, rel, segno, unique_index)
    }

    pub fn fetch_session<'a>(
        &'a self,
        txn: &'a Transaction,
        rel: &AoRelation,
        snapshot: Snapshot,
        projection: Option<&[usize]>,
    ) -> Result<FetchSession<'a>> {
        FetchSession::new(self, txn, rel, snapshot, projection)
    }

    pub fn block_range_scan<'a>(
        &'a self,
        txn: &'a Transaction,
        rel: &AoRelation,
        snapshot: Snapshot,
        projection: Option<&[usize]>,
    ) -> Result<BlockRangeScan<'a>> {
        BlockRangeScan::new(self, txn, rel, snapshot, projection)
    }

    pub fn unique_checker<'a>(&'a self, txn: &'a Transaction, rel: &AoRelation) -> Result<UniqueChecker<'a>> {
        UniqueChecker::new(self, txn, rel)
    }

    pub fn index_only_checker<'a>(
        &'a self,
        txn: &'a Transaction,
        rel: &AoRelation,
        snapshot: Snapshot,
    ) -> Result<IndexOnlyChecker<'a>> {
        IndexOnlyChecker::new(self, txn, rel, snapshot)
    }

    /// Reclaim a segment left AWAITING_DROP by compaction: truncate its
    /// files, delete its directory rows and reset its catalog row. The
    /// caller must hold the segment lock.
    pub fn compact_drop_segment(&self, txn: &Transaction, rel: &AoRelation, segno: SegNo) -> Result<()> {
        let segs = self.segfiles(rel);
        let info = segs
            .get_info(txn, &txn.self_snapshot(), segno, true)?
            .ok_or_else(|| Error::corruption(&rel.name, segno, None, "segment row not found"))?;
        if !info.is_awaiting_drop() {
            return Err(Error::Configuration(format!(
                "segment {} of relation \"{}\" is {}, not AWAITING_DROP",
                segno, rel.name, info.state
            )));
        }

        for cg in 0..rel.num_column_groups() {
            truncate_segment_file(&segment_file_path(self.config.data_dir(), rel.relid, cg, segno))?;
        }
        let deleted = BlockDirectory::delete_segment_files(&self.catalog, txn, rel, segno)?;
        segs.clear(txn, segno)?;
        debug!(relid = rel.relid, segno, minipages = deleted, "segment dropped");
        Ok(())
    }

    /// Remove a relation with its catalog rows, counters and files. Takes
    /// effect immediately regardless of transactions.
    pub fn drop_relation(&self, name: &str) -> Result<()> {
        let rel = self.relation(name)?;
        let relid = rel.relid;
        let segnos: Vec<SegNo> = self
            .segfiles(&rel)
            .get_all_history()
            .into_iter()
            .map(|info| info.segno)
            .collect();

        for segno in &segnos {
            for cg in 0..rel.num_column_groups() {
                remove_segment_file(&segment_file_path(self.config.data_dir(), relid, cg, *segno))?;
            }
        }
        let segfile_rows = self.catalog.segfiles.write().purge(|row| row.relid == relid);
        let minipages = self.catalog.blkdir.write().purge(|row| row.relid == relid);
        self.fastseq.remove_entries(relid)?;
        self.catalog.remove_relation(relid);
        info!(relid, name, segfile_rows, minipages, "relation dropped");
        Ok(())
    }

    /// Prune dead catalog versions, persist committed catalog state and
    /// compact the counter log
    pub fn checkpoint(&self) -> Result<()> {
        self.catalog.prune(&self.txns);
        self.catalog.checkpoint(&self.txns)?;
        self.fastseq.compact()?;
        Ok(())
    }
}

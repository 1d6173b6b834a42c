#![allow(dead_code)]

use aostore::config::Config;
use aostore::db::Database;
use aostore::storage::catalog::AoRelation;
use aostore::types::{AoTupleId, Orientation, SegNo};
use tempfile::TempDir;

/// TestDb manages an isolated data directory for integration testing
pub struct TestDb {
    dir: TempDir,
    configure: fn(Config) -> Config,
    pub db: Database,
}

impl TestDb {
    /// Create a database in a fresh temp directory
    pub fn new() -> Self {
        Self::with_config(|c| c)
    }

    pub fn with_config(configure: fn(Config) -> Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db = Database::open(configure(Config::new(dir.path()).with_fsync(false))).expect("failed to open database");
        TestDb { dir, configure, db }
    }

    /// Checkpoint, close and reopen the same directory
    pub fn restart(&mut self) {
        self.db.checkpoint().expect("checkpoint failed");
        self.reopen();
    }

    /// Reopen without a checkpoint, as after a crash
    pub fn reopen(&mut self) {
        let config = (self.configure)(Config::new(self.dir.path()).with_fsync(false));
        self.db = Database::open(config).expect("failed to reopen database");
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn row_table(&self, name: &str) -> AoRelation {
        self.db
            .create_relation(name, Orientation::Row, 1, true)
            .expect("create relation failed")
    }

    pub fn column_table(&self, name: &str, columns: u32) -> AoRelation {
        self.db
            .create_relation(name, Orientation::Column, columns, true)
            .expect("create relation failed")
    }

    /// Insert `n` single-value rows into `segno` and commit
    pub fn load_rows(&self, rel: &AoRelation, segno: SegNo, n: usize) -> Vec<AoTupleId> {
        let txn = self.db.begin();
        let mut session = self.db.insert_session(&txn, rel, segno, false).expect("insert session failed");
        let tids = (0..n)
            .map(|i| {
                let values = (0..rel.num_column_groups())
                    .map(|cg| format!("row-{}-col-{}", i, cg).into_bytes())
                    .collect();
                session.insert(values).expect("insert failed")
            })
            .collect();
        session.finish().expect("finish failed");
        txn.commit();
        tids
    }
}

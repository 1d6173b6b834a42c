mod common;

use aostore::Error;
use aostore::types::{MAX_ROW_NUM, RESERVED_SEGNO};
use common::TestDb;

#[test]
fn test_allocation_is_monotonic() {
    let t = TestDb::new();
    let rel = t.row_table("seq");
    let seq = t.db.fast_sequence();

    assert_eq!(seq.read_last(rel.relid, RESERVED_SEGNO), 0);
    assert_eq!(seq.allocate(&rel, 1, 100).unwrap(), 1);
    assert_eq!(seq.allocate(&rel, 1, 100).unwrap(), 101);
    assert_eq!(seq.allocate(&rel, 2, 5).unwrap(), 1);
    assert_eq!(seq.read_last(rel.relid, 1), 200);

    seq.set_last(&rel, 1, 500).unwrap();
    assert_eq!(seq.allocate(&rel, 1, 1).unwrap(), 501);
    assert!(seq.set_last(&rel, 1, 10).unwrap_err().is_corruption());
    assert!(seq.allocate(&rel, 1, 0).unwrap_err().is_configuration());
}

#[test]
fn test_aborted_allocations_stay_consumed() {
    let t = TestDb::new();
    let rel = t.row_table("aborted");

    let txn = t.db.begin();
    let mut session = t.db.insert_session(&txn, &rel, 1, false).unwrap();
    session.insert(vec![b"gone".to_vec()]).unwrap();
    drop(session);
    txn.abort();

    assert_eq!(t.db.fast_sequence().read_last(rel.relid, 1), 100);
    let tids = t.load_rows(&rel, 1, 1);
    assert_eq!(tids[0].row_num, 101);
}

#[test]
fn test_exhaustion() {
    let t = TestDb::new();
    let rel = t.row_table("full");
    let seq = t.db.fast_sequence();

    seq.set_last(&rel, 1, MAX_ROW_NUM - 5).unwrap();
    assert_eq!(seq.allocate(&rel, 1, 5).unwrap(), MAX_ROW_NUM - 4);
    let err = seq.allocate(&rel, 1, 1).unwrap_err();
    assert!(matches!(err, Error::RowNumberExhausted { segno: 1, .. }));
    assert_eq!(seq.read_last(rel.relid, 1), MAX_ROW_NUM);
}

#[test]
fn test_counters_survive_crash_and_checkpoint() {
    let mut t = TestDb::new();
    let rel = t.row_table("durable");
    t.db.fast_sequence().allocate(&rel, 3, 42).unwrap();
    t.reopen();
    assert_eq!(t.db.fast_sequence().read_last(rel.relid, 3), 42);

    t.db.fast_sequence().allocate(&rel, 3, 8).unwrap();
    t.restart();
    assert_eq!(t.db.fast_sequence().read_last(rel.relid, 3), 50);
    assert_eq!(t.db.fast_sequence().read_last(rel.relid, RESERVED_SEGNO), 0);
}

#[test]
fn test_drop_removes_counters() {
    let mut t = TestDb::new();
    let rel = t.row_table("dropped");
    t.db.fast_sequence().allocate(&rel, 1, 10).unwrap();
    t.db.drop_relation("dropped").unwrap();
    assert_eq!(t.db.fast_sequence().read_last(rel.relid, 1), 0);

    t.reopen();
    assert_eq!(t.db.fast_sequence().read_last(rel.relid, 1), 0);
}

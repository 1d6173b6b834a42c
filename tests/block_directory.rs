mod common;

use aostore::blockdir::{BlockDirectory, Minipage, visible_minipages};
use aostore::segfiles::{ColumnEof, SegmentFileInfo};
use aostore::storage::catalog::AoRelation;
use aostore::txn::Transaction;
use aostore::types::{AoTupleId, MAX_ROW_NUM, ROWS_PER_HEAP_BLOCK, SegNo};
use common::TestDb;

/// Write `entries` (first row, offset, row count) for `segno` in one
/// transaction and commit the segment's eof
fn write_entries(t: &TestDb, rel: &AoRelation, segno: SegNo, entries: &[(i64, i64, i64)], eof: i64) {
    let db = &t.db;
    let txn = db.begin();
    let segs = db.segfiles(rel);
    if segs.get_info(&txn, &txn.self_snapshot(), segno, false).unwrap().is_none() {
        segs.insert(&txn, segno).unwrap();
    } else {
        db.lock_segment(&txn, rel, segno);
    }
    let info = segs.get_info(&txn, &txn.self_snapshot(), segno, true).unwrap().unwrap();
    let last_sequence = db.fast_sequence().read_last(rel.relid, segno);
    let mut dir = BlockDirectory::init_for_insert(db.catalog(), &txn, rel, db.config(), &info, last_sequence).unwrap();
    for &(first, offset, count) in entries {
        assert!(dir.insert_entry(0, first, offset, count).unwrap());
    }
    dir.end_for_insert().unwrap();
    let rows: i64 = entries.iter().map(|e| e.2).sum();
    if let Some(last) = entries.last() {
        db.fast_sequence().set_last(rel, segno, last.0 + last.2 - 1).unwrap();
    }
    segs.update(&txn, segno, &[ColumnEof { eof, eof_uncompressed: eof }], rows, entries.len() as i64, 1)
        .unwrap();
    txn.commit();
}

fn search<'a>(t: &'a TestDb, txn: &'a Transaction, rel: &AoRelation) -> BlockDirectory<'a> {
    let infos: Vec<SegmentFileInfo> = t.db.segfiles(rel).get_all(&txn.snapshot()).unwrap();
    BlockDirectory::init_for_search(t.db.catalog(), txn, rel, t.db.config(), infos, txn.snapshot(), None).unwrap()
}

#[test]
fn test_lookup_scenario() {
    let t = TestDb::new();
    let rel = t.row_table("events");

    write_entries(&t, &rel, 3, &[(1, 0, 40)], 4096);
    {
        let reader = t.db.begin();
        let mut dir = search(&t, &reader, &rel);
        let entry = dir.get_entry(AoTupleId::new(3, 20), 0).unwrap().unwrap();
        assert_eq!((entry.file_offset, entry.first_row_num, entry.last_row_num), (0, 1, 40));
        assert_eq!(entry.after_file_offset, 4096);
    }

    write_entries(&t, &rel, 3, &[(41, 4096, 40)], 8192);
    let reader = t.db.begin();
    let mut dir = search(&t, &reader, &rel);
    let entry = dir.get_entry(AoTupleId::new(3, 41), 0).unwrap().unwrap();
    assert_eq!((entry.file_offset, entry.first_row_num, entry.last_row_num), (4096, 41, 80));
    let first = dir.get_entry(AoTupleId::new(3, 20), 0).unwrap().unwrap();
    assert_eq!(first.after_file_offset, 4096);
    assert!(dir.get_entry(AoTupleId::new(3, 200), 0).unwrap().is_none());
    assert!(dir.get_entry(AoTupleId::new(3, 0), 0).unwrap().is_none());
}

#[test]
fn test_holes_are_not_found() {
    let t = TestDb::new();
    let rel = t.row_table("holes");
    write_entries(&t, &rel, 1, &[(1, 0, 50), (100, 4096, 51)], 8192);

    let reader = t.db.begin();
    let mut dir = search(&t, &reader, &rel);
    assert!(dir.get_entry(AoTupleId::new(1, 75), 0).unwrap().is_none());
    assert_eq!(dir.get_entry(AoTupleId::new(1, 150), 0).unwrap().unwrap().file_offset, 4096);
    // cached minipage answers the hole too
    assert!(dir.get_entry(AoTupleId::new(1, 51), 0).unwrap().is_none());
    assert!(dir.get_entry(AoTupleId::new(1, 151), 0).unwrap().is_none());
}

#[test]
fn test_partial_scan_skips_gaps() {
    let t = TestDb::new();
    let rel = t.row_table("partial");
    let block = ROWS_PER_HEAP_BLOCK;
    // A covers heap block 0, a gap covers block 1, B starts inside block 1
    write_entries(
        &t,
        &rel,
        2,
        &[(1, 0, block - 100), (block + 5000, 65536, 1000)],
        1 << 20,
    );

    let reader = t.db.begin();
    let mut dir = search(&t, &reader, &rel);
    let blkno = |start_row: i64| AoTupleId::new(2, start_row).heap_block();

    let (seg, a) = dir.get_entry_for_partial_scan(blkno(0), 0).unwrap().unwrap();
    assert_eq!(dir.seginfos()[seg].segno, 2);
    assert_eq!(a.file_offset, 0);

    let (_, b) = dir.get_entry_for_partial_scan(blkno(block), 0).unwrap().unwrap();
    assert_eq!(b.file_offset, 65536);

    // past the last entry: the last entry is returned
    let (_, tail) = dir.get_entry_for_partial_scan(blkno(5 * block), 0).unwrap().unwrap();
    assert_eq!(tail.file_offset, 65536);
}

#[test]
fn test_round_trip_through_reload() {
    let t = TestDb::with_config(|c| c.with_minipage_size(4));
    let rel = t.row_table("reload");
    let entries: Vec<(i64, i64, i64)> = (0..10).map(|i| (i * 10 + 1, i * 1000, 10)).collect();
    write_entries(&t, &rel, 1, &entries, 10_000);

    let minipages = visible_minipages(t.db.catalog(), t.db.transactions(), &rel, &t.db.begin().snapshot());
    assert_eq!(minipages.len(), 3);
    let total: usize = minipages
        .iter()
        .map(|row| Minipage::decode(&row.minipage, 4).unwrap().len())
        .sum();
    assert_eq!(total, 10);

    let txn = t.db.begin();
    t.db.lock_segment(&txn, &rel, 1);
    let info = t.db.segfiles(&rel).get_info(&txn, &txn.self_snapshot(), 1, true).unwrap().unwrap();
    let mut dir = BlockDirectory::init_for_insert(t.db.catalog(), &txn, &rel, t.db.config(), &info, 100).unwrap();
    assert_eq!(dir.pending_entries(0).len(), 2);
    for &(first, offset, count) in &entries {
        for row in [first, first + count - 1] {
            let entry = dir.get_entry(AoTupleId::new(1, row), 0).unwrap().unwrap();
            assert_eq!((entry.file_offset, entry.first_row_num), (offset, first));
            assert_eq!(entry.last_row_num - entry.first_row_num + 1, count);
        }
    }
}

#[test]
fn test_placeholder_covers_rows_before_real_entry() {
    let t = TestDb::new();
    let rel = t.row_table("unique");
    let txn = t.db.begin();
    let segs = t.db.segfiles(&rel);
    segs.insert(&txn, 1).unwrap();
    let info = segs.get_info(&txn, &txn.self_snapshot(), 1, true).unwrap().unwrap();

    let mut writer = BlockDirectory::init_for_insert(t.db.catalog(), &txn, &rel, t.db.config(), &info, 0).unwrap();
    assert!(writer.insert_placeholder(0, 500, 0).unwrap());
    assert!(writer.pending_entries(0).is_empty());

    let mut checker = BlockDirectory::init_for_unique_checks(t.db.catalog(), &txn, &rel, t.db.config()).unwrap();
    for row in [500, 501, 100_000, MAX_ROW_NUM] {
        assert!(checker.unique_check(AoTupleId::new(1, row), &txn.self_snapshot()).unwrap());
    }
    assert!(!checker.unique_check(AoTupleId::new(1, 499), &txn.self_snapshot()).unwrap());
    assert!(checker.unique_check(AoTupleId::new(1, 500), &txn.snapshot()).unwrap_err().is_configuration());

    // another transaction sees the in-progress placeholder through a dirty snapshot
    let other = t.db.begin();
    let mut other_checker = BlockDirectory::init_for_unique_checks(t.db.catalog(), &other, &rel, t.db.config()).unwrap();
    assert!(other_checker.unique_check(AoTupleId::new(1, 600), &other.dirty_snapshot()).unwrap());
    assert!(!other_checker.unique_check(AoTupleId::new(1, 600), &other.self_snapshot()).unwrap());

    // the real entry replaces the placeholder row later in the transaction
    writer.insert_entry(0, 500, 0, 20).unwrap();
    writer.end_for_insert().unwrap();
    txn.command_counter_increment();
    assert!(!checker.unique_check(AoTupleId::new(1, 600), &txn.self_snapshot()).unwrap());
    assert!(checker.unique_check(AoTupleId::new(1, 519), &txn.self_snapshot()).unwrap());
}

#[test]
fn test_index_only_scan_needs_mvcc_snapshot() {
    let t = TestDb::new();
    let rel = t.column_table("wide", 3);
    let txn = t.db.begin();
    let err = BlockDirectory::init_for_index_only_scan(t.db.catalog(), &txn, &rel, t.db.config(), txn.self_snapshot())
        .err()
        .unwrap();
    assert!(err.is_configuration());

    let plain = t.db.create_relation("plain", aostore::Orientation::Row, 1, false).unwrap();
    let err = BlockDirectory::init_for_unique_checks(t.db.catalog(), &txn, &plain, t.db.config()).err().unwrap();
    assert!(err.is_configuration());
}

#[test]
fn test_minipages_survive_restart() {
    let mut t = TestDb::new();
    let rel = t.row_table("durable");
    write_entries(&t, &rel, 5, &[(1, 0, 10), (11, 512, 10)], 1024);
    t.restart();

    let reader = t.db.begin();
    let mut dir = search(&t, &reader, &rel);
    let entry = dir.get_entry(AoTupleId::new(5, 15), 0).unwrap().unwrap();
    assert_eq!((entry.file_offset, entry.after_file_offset), (512, 1024));
}

mod common;

use aostore::segfiles::ColumnEof;
use aostore::types::{FORMAT_VERSION_LATEST, SegmentState};
use common::TestDb;

fn eof(n: i64) -> ColumnEof {
    ColumnEof { eof: n, eof_uncompressed: n }
}

#[test]
fn test_add_count() {
    let t = TestDb::new();
    let rel = t.row_table("counts");
    let segs = t.db.segfiles(&rel);

    let txn = t.db.begin();
    segs.insert(&txn, 3).unwrap();
    segs.update(&txn, 3, &[eof(8192)], 100, 2, 1).unwrap();
    txn.commit();

    let txn = t.db.begin();
    t.db.lock_segment(&txn, &rel, 3);
    segs.add_count(&txn, 3, 40, 1, 1).unwrap();
    let info = segs.get_info(&txn, &txn.snapshot(), 3, true).unwrap().unwrap();
    assert_eq!(info.total_tupcount, 140);
    assert_eq!(info.varblockcount, 3);
    assert_eq!(info.modcount, 2);
    assert_eq!(info.eof, 8192);
    txn.commit();
}

#[test]
fn test_awaiting_drop_totals() {
    let t = TestDb::new();
    let rel = t.row_table("totals");
    let segs = t.db.segfiles(&rel);

    let txn = t.db.begin();
    for (segno, bytes, tuples) in [(1, 1000, 10), (2, 3000, 30)] {
        segs.insert(&txn, segno).unwrap();
        segs.update(&txn, segno, &[eof(bytes)], tuples, 1, 1).unwrap();
    }
    txn.commit();

    let txn = t.db.begin();
    let before = segs.totals(&txn.snapshot(), None).unwrap();
    assert_eq!((before.total_bytes, before.total_tuples, before.total_filesegs), (4000, 40, 2));

    t.db.lock_segment(&txn, &rel, 2);
    segs.mark_awaiting_drop(&txn, 2).unwrap();
    let after = segs.totals(&txn.snapshot(), None).unwrap();
    assert_eq!((after.total_bytes, after.total_tuples, after.total_filesegs), (4000, 10, 2));

    let err = segs.mark_awaiting_drop(&txn, 2).unwrap_err();
    assert!(err.is_corruption());
    txn.commit();

    let txn = t.db.begin();
    let info = segs.get_info(&txn, &txn.snapshot(), 2, false).unwrap().unwrap();
    assert_eq!(info.state, SegmentState::AwaitingDrop);
}

#[test]
fn test_clear_is_idempotent() {
    let t = TestDb::new();
    let rel = t.column_table("cleared", 2);
    let segs = t.db.segfiles(&rel);

    let txn = t.db.begin();
    segs.insert(&txn, 1).unwrap();
    segs.update(&txn, 1, &[eof(100), eof(200)], 5, 2, 1).unwrap();
    segs.mark_awaiting_drop(&txn, 1).unwrap();
    segs.clear(&txn, 1).unwrap();
    let once = segs.get_info(&txn, &txn.snapshot(), 1, true).unwrap().unwrap();
    segs.clear(&txn, 1).unwrap();
    let twice = segs.get_info(&txn, &txn.snapshot(), 1, true).unwrap().unwrap();
    txn.commit();

    assert_eq!(once, twice);
    assert_eq!((once.eof, once.total_tupcount, once.varblockcount), (0, 0, 0));
    assert_eq!(once.modcount, 1);
    assert_eq!(once.formatversion, FORMAT_VERSION_LATEST);
    assert_eq!(once.state, SegmentState::Default);
    assert!(once.columns.iter().all(|c| c.eof == 0));
}

#[test]
fn test_column_eofs_sum() {
    let t = TestDb::new();
    let rel = t.column_table("sums", 3);
    let segs = t.db.segfiles(&rel);

    let txn = t.db.begin();
    segs.insert(&txn, 1).unwrap();
    segs.update(&txn, 1, &[eof(10), eof(20), eof(30)], 1, 3, 1).unwrap();
    let info = segs.get_info(&txn, &txn.snapshot(), 1, true).unwrap().unwrap();
    assert_eq!(info.eof, 60);
    assert_eq!(info.eof_for(1), 20);

    let err = segs.update(&txn, 1, &[eof(10), eof(20)], 1, 1, 1).unwrap_err();
    assert!(err.is_configuration());
    let err = segs.update(&txn, 1, &[eof(10), eof(5), eof(30)], 1, 1, 1).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_changes_need_the_segment_lock() {
    let t = TestDb::new();
    let rel = t.row_table("locked");
    let segs = t.db.segfiles(&rel);

    let owner = t.db.begin();
    segs.insert(&owner, 1).unwrap();
    owner.commit();

    let txn = t.db.begin();
    assert!(segs.add_count(&txn, 1, 1, 1, 1).unwrap_err().is_configuration());
    assert!(segs.clear(&txn, 1).unwrap_err().is_configuration());
    assert!(segs.get_info(&txn, &txn.snapshot(), 1, true).unwrap_err().is_configuration());
    // unlocked lookups are fine
    assert!(segs.get_info(&txn, &txn.snapshot(), 1, false).unwrap().is_some());
    assert!(segs.get_info(&txn, &txn.snapshot(), 9, false).unwrap().is_none());
}

#[test]
fn test_insert_rejects_bad_segno_and_duplicates() {
    let t = TestDb::new();
    let rel = t.row_table("segnos");
    let segs = t.db.segfiles(&rel);

    let txn = t.db.begin();
    assert!(segs.insert(&txn, 128).unwrap_err().is_configuration());
    assert!(segs.insert(&txn, -1).unwrap_err().is_configuration());
    segs.insert(&txn, 127).unwrap();
    assert!(segs.insert(&txn, 127).unwrap_err().is_corruption());
}

#[test]
fn test_new_segment_is_visible_at_once() {
    let t = TestDb::new();
    let rel = t.row_table("frozen");
    let segs = t.db.segfiles(&rel);

    let reader = t.db.begin();
    let writer = t.db.begin();
    segs.insert(&writer, 4).unwrap();
    segs.update(&writer, 4, &[eof(512)], 7, 1, 1).unwrap();

    // the zeroed row is frozen; the update is not committed
    let seen = segs.get_all(&reader.snapshot()).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].eof, seen[0].total_tupcount), (0, 0));

    writer.abort();
    let after = t.db.begin();
    let info = segs.get_info(&after, &after.snapshot(), 4, false).unwrap().unwrap();
    assert_eq!((info.eof, info.total_tupcount, info.modcount), (0, 0, 0));
}

#[test]
fn test_snapshot_isolation() {
    let t = TestDb::new();
    let rel = t.row_table("isolated");
    let segs = t.db.segfiles(&rel);

    let setup = t.db.begin();
    segs.insert(&setup, 1).unwrap();
    segs.update(&setup, 1, &[eof(100)], 10, 1, 1).unwrap();
    setup.commit();

    let reader = t.db.begin();
    let snapshot = reader.snapshot();

    let writer = t.db.begin();
    t.db.lock_segment(&writer, &rel, 1);
    segs.update(&writer, 1, &[eof(200)], 10, 1, 1).unwrap();
    writer.commit();

    let old = segs.get_all(&snapshot).unwrap();
    assert_eq!(old[0].total_tupcount, 10);
    let fresh = t.db.begin();
    let new = segs.get_all(&fresh.snapshot()).unwrap();
    assert_eq!((new[0].eof, new[0].total_tupcount, new[0].modcount), (200, 20, 2));

    let history = segs.get_all_history();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].modcount <= w[1].modcount));
}

#[test]
fn test_segments_survive_restart() {
    let mut t = TestDb::new();
    let rel = t.column_table("restart", 2);
    {
        let segs = t.db.segfiles(&rel);
        let txn = t.db.begin();
        segs.insert(&txn, 2).unwrap();
        segs.update(&txn, 2, &[eof(64), eof(96)], 3, 2, 1).unwrap();
        txn.commit();
    }
    t.restart();

    let rel = t.db.relation("restart").unwrap();
    let segs = t.db.segfiles(&rel);
    let txn = t.db.begin();
    let info = segs.get_info(&txn, &txn.snapshot(), 2, false).unwrap().unwrap();
    assert_eq!(info.columns, vec![eof(64), eof(96)]);
    assert_eq!(info.eof, 160);
    assert_eq!(segs.get_all_history().len(), 1);
}

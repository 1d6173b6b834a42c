use std::process;

use aostore::blockdir::{Minipage, visible_minipages};
use aostore::config::Config;
use aostore::db::Database;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_args();
    if let Err(err) = run(config) {
        eprintln!("aoinspect: {}", err);
        process::exit(1);
    }
}

fn run(config: Config) -> aostore::Result<()> {
    let minipage_size = config.minipage_size();
    let db = Database::open(config)?;
    let txn = db.begin();
    let snapshot = txn.snapshot();

    for rel in db.catalog().relations() {
        println!(
            "relation {} \"{}\": {:?}, {} columns, block directory {}",
            rel.relid,
            rel.name,
            rel.orientation,
            rel.num_columns,
            if rel.has_block_directory { "on" } else { "off" }
        );

        let segs = db.segfiles(&rel);
        let totals = segs.totals(&snapshot, None)?;
        println!(
            "  {} segments, {} tuples, {} bytes, {} blocks, modcount {}",
            totals.total_filesegs, totals.total_tuples, totals.total_bytes, totals.total_varblocks, totals.modcount
        );

        for info in segs.get_all(&snapshot)? {
            println!(
                "  segno {:>3}  eof {:>10}  tuples {:>8}  blocks {:>6}  modcount {:>4}  format {}  {}  last row {}",
                info.segno,
                info.eof,
                info.total_tupcount,
                info.varblockcount,
                info.modcount,
                info.formatversion,
                info.state,
                db.fast_sequence().read_last(rel.relid, info.segno)
            );
        }

        if !rel.has_block_directory {
            continue;
        }
        let rows = visible_minipages(db.catalog(), db.transactions(), &rel, &snapshot);
        for row in rows {
            match Minipage::decode(&row.minipage, minipage_size) {
                Ok(mp) => {
                    let rows_covered: i64 = mp.entries.iter().map(|e| e.row_count).sum();
                    println!(
                        "  minipage segno {} column group {} first row {}: {} entries, {} rows",
                        row.segno,
                        row.column_group_no,
                        row.first_row_num,
                        mp.len(),
                        rows_covered
                    );
                }
                Err(e) => println!(
                    "  minipage segno {} column group {} first row {}: unreadable ({})",
                    row.segno, row.column_group_no, row.first_row_num, e
                ),
            }
        }
    }
    txn.commit();
    Ok(())
}

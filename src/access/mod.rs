//! Sessions that read and write segment data through the block directory.

pub mod checks;
pub mod fetch;
pub mod insert;
pub mod scan;
pub mod visimap;

use std::io;

use crate::error::Error;
use crate::storage::catalog::AoRelation;
use crate::types::{RowNum, SegNo};

pub use self::checks::{IndexOnlyChecker, UniqueCheck, UniqueChecker};
pub use self::fetch::FetchSession;
pub use self::insert::{InsertSession, InsertSummary};
pub use self::scan::BlockRangeScan;
pub use self::visimap::{AllVisible, DeletedRows, Visimap};

/// Malformed segment data is corruption of that segment; anything else
/// stays an I/O error
fn file_error(rel: &AoRelation, segno: SegNo, row_num: Option<RowNum>, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::InvalidData {
        Error::corruption(&rel.name, segno, row_num, err.to_string())
    } else {
        Error::Io(err)
    }
}

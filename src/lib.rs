//! Metadata and access layer for append-optimized tables: the segment-file
//! catalog, non-transactional row number sequences, and the block directory
//! that maps row numbers to byte ranges of segment files.

pub mod access;
pub mod blockdir;
pub mod config;
pub mod db;
pub mod error;
pub mod fastseq;
pub mod segfiles;
pub mod storage;
pub mod txn;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use types::{AoTupleId, Orientation, RelId, RowNum, SegNo, SegmentState};

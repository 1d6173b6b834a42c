use std::path::{Path, PathBuf};

/// Catalog page size used to size a minipage row
const CATALOG_PAGE_SIZE: usize = 8192;

/// Bytes of a catalog page left for one row (page and item headers removed)
const MAX_CATALOG_ROW_SIZE: usize = CATALOG_PAGE_SIZE - 32;

/// Entries in one minipage: an eighth of a catalog row minus row and
/// attribute headers, divided by the 24-byte entry size.
pub const DEFAULT_MINIPAGE_SIZE: usize = (MAX_CATALOG_ROW_SIZE / 8 - 23 - 64 * 3) / 24;

/// Row numbers reserved per fast sequence round trip
pub const NUM_FAST_SEQUENCES: i64 = 100;

/// Default target size of a data block
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

/// Most rows one data block may carry
pub const DEFAULT_MAX_ROWS_PER_BLOCK: usize = 16383;

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) data_dir: PathBuf,
    /// Entries per minipage before it is written out
    pub(crate) minipage_size: usize,
    /// Minimum byte distance between directory entries; 0 keeps every block
    pub(crate) entry_min_range: i64,
    pub(crate) block_size: usize,
    pub(crate) max_rows_per_block: usize,
    pub(crate) fast_sequence_batch: i64,
    pub(crate) fsync: bool,
}

impl Config {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            minipage_size: DEFAULT_MINIPAGE_SIZE,
            entry_min_range: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            max_rows_per_block: DEFAULT_MAX_ROWS_PER_BLOCK,
            fast_sequence_batch: NUM_FAST_SEQUENCES,
            fsync: true,
        }
    }

    pub fn from_args() -> Self {
        let mut config = Config::new(".");
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--data-dir" => {
                    if let Some(dir) = args.next() {
                        config.data_dir = PathBuf::from(dir);
                    }
                }
                "--minipage-size" => {
                    if let Some(n) = args.next().and_then(|v| v.parse().ok()) {
                        config.minipage_size = n;
                    }
                }
                "--min-range" => {
                    if let Some(n) = args.next().and_then(|v| v.parse().ok()) {
                        config.entry_min_range = n;
                    }
                }
                _ => {}
            }
        }
        config
    }

    pub fn with_minipage_size(mut self, entries: usize) -> Self {
        self.minipage_size = entries.max(1);
        self
    }

    pub fn with_entry_min_range(mut self, bytes: i64) -> Self {
        self.entry_min_range = bytes.max(0);
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes.max(1);
        self
    }

    pub fn with_max_rows_per_block(mut self, rows: usize) -> Self {
        self.max_rows_per_block = rows.max(1);
        self
    }

    pub fn with_fast_sequence_batch(mut self, count: i64) -> Self {
        self.fast_sequence_batch = count.max(1);
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn minipage_size(&self) -> usize {
        self.minipage_size
    }

    pub fn entry_min_range(&self) -> i64 {
        self.entry_min_range
    }
}

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the segment catalog, the fast sequence store and the
/// block directory.
///
/// Lookups that find nothing return `Option`/`bool`; only broken invariants
/// and caller misuse end up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted state contradicts itself. Never retried.
    #[error("corrupt append-only metadata for relation \"{table}\" segno {segno} at {row}: {detail}", row = display_row(.row_num))]
    Corruption {
        table: String,
        segno: i32,
        row_num: Option<i64>,
        detail: String,
    },

    /// Operation invoked without the lock or directory it requires.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catalog row changed underneath the caller.
    #[error("concurrent catalog update: {0}")]
    Conflict(String),

    #[error("row numbers exhausted for relation \"{table}\" segno {segno}")]
    RowNumberExhausted { table: String, segno: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Codec(String),
}

impl Error {
    pub fn corruption(
        table: impl Into<String>,
        segno: i32,
        row_num: Option<i64>,
        detail: impl Into<String>,
    ) -> Self {
        Error::Corruption {
            table: table.into(),
            segno,
            row_num,
            detail: detail.into(),
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

fn display_row(row_num: &Option<i64>) -> String {
    match row_num {
        Some(row) => format!("row {}", row),
        None => "no particular row".to_string(),
    }
}

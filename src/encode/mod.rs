//! Run-length-style encoders backing the per-chunk headers and the
//! sample-index→chunk-id mapping.
//!
//! Each encoder stores rows of `(value, last_index)`: one row per run of
//! consecutive samples sharing a value. Appends merge into the last row
//! when the value repeats, so size is proportional to the number of runs
//! rather than the number of samples, and lookup is a binary search.

use thiserror::Error;

pub mod byte_range;
pub mod chunk_id;
pub mod shape;

pub use byte_range::ByteRangeEncoder;
pub use chunk_id::ChunkIdEncoder;
pub use shape::ShapeEncoder;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("encoded blob ended early: {0}")]
    Truncated(&'static str),
    #[error("unsupported encoding version {0}")]
    Version(u8),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub(crate) fn eof(_: std::io::Error) -> DecodeError {
    DecodeError::Truncated("unexpected end of blob")
}

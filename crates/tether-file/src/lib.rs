//! # tether-file
//!
//! File metadata and the shared file-set registry for the tether renter
//! client.
//!
//! A [`TetherFile`] records, for every chunk of a logical file, which hosts
//! store which erasure-coded pieces. The [`FileSet`] registry hands out
//! reference-counted access to the same descriptor from concurrent callers
//! and keeps renames and deletes consistent: a sibling holding a reference
//! keeps reading the same descriptor no matter what happens to the path it
//! was opened under.
//!
//! Metadata is persisted crash-atomically (bincode to a temp file, then an
//! atomic rename over the live file), so on open the in-memory state equals
//! the last committed on-disk state.

mod file;
mod health;
mod metadata;
mod persist;
mod set;

pub use file::{FileId, TetherFile};
pub use metadata::{ChunkRecord, FileMetadata, PiecePlacement};
pub use set::{CallerId, FileSet, METADATA_EXT};

/// Errors surfaced by descriptors and the registry
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("path already in use: {0}")]
    PathInUse(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path not open: {0}")]
    NotOpen(String),

    #[error("index out of range: {0}")]
    OutOfRange(String),

    #[error("file has been deleted")]
    Deleted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, FileError>;

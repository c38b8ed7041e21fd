//! # tether-upload
//!
//! Streaming upload engine for the tether renter client.
//!
//! [`Uploader::upload_stream`] takes an arbitrary-length byte stream, slices
//! it into chunks, and pushes per-chunk work items onto the [`UploadHeap`]
//! for the worker pool to erasure-code and dispatch to hosts. The call
//! returns once every chunk is *available* on the network (at least
//! `min_pieces` placed); redundancy keeps boosting in the background.
//!
//! The stream is consumed through a sequence of [`StreamShard`]s, one per
//! chunk. A shard signals completion once the chunk's bytes have been read
//! from the upstream, which is what allows the driver to hand the next
//! chunk's shard out without two readers racing on the same stream.

mod chunk;
mod heap;
mod params;
mod pool;
mod shard;
mod streamer;

pub use chunk::{ChunkId, UnfinishedChunk};
pub use heap::UploadHeap;
pub use params::UploadParams;
pub use pool::{Contractor, Disruptor, NoDisruption, WorkerPool};
pub use shard::{ShardError, SharedReader, StreamShard};
pub use streamer::{UploadConfig, Uploader};

use tether_ec::EcError;
use tether_file::FileError;

/// Errors surfaced by the upload driver
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("stream shard already closed")]
    ShardClosed,

    #[error("conflicting upload options: {0}")]
    ConflictingOptions(&'static str),

    #[error("not enough contracts to upload file: got {have}, needed {need}")]
    InsufficientContracts { have: usize, need: usize },

    #[error("need at least {need} workers for upload but got only {have}")]
    InsufficientWorkers { have: usize, need: usize },

    #[error("interrupted by shutdown")]
    Interrupted,

    #[error("piece upload failed: {0}")]
    PieceUpload(String),

    #[error("upstream stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Erasure(#[from] EcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UploadError>;

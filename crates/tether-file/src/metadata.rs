//! Persisted file metadata: erasure shape, key material and the per-chunk
//! piece table.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use tether_ec::{CipherType, ErasureParams, MasterKey};
use tether_types::{FileMode, HostPublicKey, PieceDigest};

/// One piece stored on one host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiecePlacement {
    pub host: HostPublicKey,
    pub digest: PieceDigest,
}

/// Piece table of a single chunk.
///
/// The outer vector is indexed by piece index in `[0, data + parity)`; the
/// inner vector lists the hosts storing that piece. A `(piece, host)` pair
/// appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub pieces: Vec<Vec<PiecePlacement>>,
}

impl ChunkRecord {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            pieces: vec![Vec::new(); num_pieces],
        }
    }

    /// Total placements in this chunk, duplicates across hosts included.
    pub fn placement_count(&self) -> usize {
        self.pieces.iter().map(Vec::len).sum()
    }
}

/// Everything a descriptor persists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMetadata {
    pub erasure: ErasureParams,
    pub cipher: CipherType,
    pub master_key: MasterKey,
    pub size: u64,
    pub mode: FileMode,
    pub creation_time: u64,
    pub local_path: Option<PathBuf>,
    pub deleted: bool,
    pub chunks: Vec<ChunkRecord>,
}

impl FileMetadata {
    /// A file of `size` logical bytes always has at least one chunk slot so
    /// that repair and append operations have somewhere to attach.
    pub fn new(
        erasure: ErasureParams,
        cipher: CipherType,
        master_key: MasterKey,
        size: u64,
        mode: FileMode,
    ) -> Self {
        let chunk_count = size.div_ceil(erasure.chunk_size()).max(1);
        let chunks = (0..chunk_count)
            .map(|_| ChunkRecord::new(erasure.num_pieces()))
            .collect();
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            erasure,
            cipher,
            master_key,
            size,
            mode,
            creation_time,
            local_path: None,
            deleted: false,
            chunks,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.erasure.chunk_size()
    }

    pub fn piece_size(&self) -> u64 {
        self.erasure.piece_size
    }

    pub fn num_pieces(&self) -> usize {
        self.erasure.num_pieces()
    }

    pub fn min_pieces(&self) -> usize {
        self.erasure.min_pieces()
    }
}

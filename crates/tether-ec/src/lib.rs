//! # tether-ec
//!
//! Erasure coding and key derivation for the tether renter client.
//!
//! A *chunk* of `piece_size * data_pieces` bytes is encoded into
//! `data_pieces + parity_pieces` *pieces* of `piece_size` bytes each; any
//! `data_pieces` of them reconstruct the chunk. The [`ErasureCoder`] trait
//! is the seam the upload core programs against; [`RsCode`] is the
//! Reed–Solomon implementation behind it.
//!
//! Piece encryption itself happens at the network layer; this crate only
//! derives the deterministic per-piece keys from a file's master key and
//! accounts for the cipher overhead inside a sector.

mod cipher;
mod rs;

pub use cipher::{CipherType, MasterKey};
pub use rs::RsCode;

use serde::{Deserialize, Serialize};
use tether_types::{PieceDigest, SECTOR_SIZE};

/// Errors that can occur during erasure coding
#[derive(Debug, thiserror::Error)]
pub enum EcError {
    #[error("invalid erasure parameters: {0}")]
    Params(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, EcError>;

/// Erasure coding shape of a file: how many data and parity pieces each
/// chunk splits into, and how large each piece is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureParams {
    pub data_pieces: u32,
    pub parity_pieces: u32,
    pub piece_size: u64,
}

impl ErasureParams {
    /// Validated constructor. The Galois-8 field bounds the total piece
    /// count at 256.
    pub fn new(data_pieces: u32, parity_pieces: u32, piece_size: u64) -> Result<Self> {
        if data_pieces == 0 {
            return Err(EcError::Params("data_pieces must be >= 1".into()));
        }
        if parity_pieces == 0 {
            return Err(EcError::Params("parity_pieces must be >= 1".into()));
        }
        if piece_size == 0 {
            return Err(EcError::Params("piece_size must be >= 1".into()));
        }
        if data_pieces + parity_pieces > 256 {
            return Err(EcError::Params(format!(
                "total pieces {} exceed field limit 256",
                data_pieces + parity_pieces
            )));
        }
        Ok(Self {
            data_pieces,
            parity_pieces,
            piece_size,
        })
    }

    /// Production constructor: a piece fills one host sector minus the
    /// cipher overhead.
    pub fn for_cipher(data_pieces: u32, parity_pieces: u32, cipher: CipherType) -> Result<Self> {
        Self::new(data_pieces, parity_pieces, SECTOR_SIZE - cipher.overhead())
    }

    pub fn min_pieces(&self) -> usize {
        self.data_pieces as usize
    }

    pub fn num_pieces(&self) -> usize {
        (self.data_pieces + self.parity_pieces) as usize
    }

    pub fn chunk_size(&self) -> u64 {
        self.piece_size * self.data_pieces as u64
    }
}

/// Contract of an erasure coder as consumed by the upload core.
pub trait ErasureCoder: Send + Sync {
    /// Number of pieces required to reconstruct a chunk.
    fn min_pieces(&self) -> usize;

    /// Total number of pieces produced per chunk.
    fn num_pieces(&self) -> usize;

    /// Size of each encoded piece in bytes.
    fn piece_size(&self) -> u64;

    /// Raw data bytes covered by one chunk.
    fn chunk_size(&self) -> u64 {
        self.piece_size() * self.min_pieces() as u64
    }

    /// Encode pre-split data shards (each exactly `piece_size` bytes) into
    /// the full piece set of `num_pieces` shards.
    fn encode_shards(&self, data: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    /// Encode raw chunk bytes: zero-pad to `chunk_size`, split into data
    /// shards, then delegate to [`encode_shards`](Self::encode_shards).
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let piece_size = self.piece_size() as usize;
        if data.len() as u64 > self.chunk_size() {
            return Err(EcError::Encode(format!(
                "chunk of {} bytes exceeds chunk size {}",
                data.len(),
                self.chunk_size()
            )));
        }
        let mut shards = Vec::with_capacity(self.min_pieces());
        for i in 0..self.min_pieces() {
            let start = (i * piece_size).min(data.len());
            let end = ((i + 1) * piece_size).min(data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(piece_size, 0);
            shards.push(shard);
        }
        self.encode_shards(shards)
    }
}

/// BLAKE3 digest of one encoded piece.
pub fn piece_digest(data: &[u8]) -> PieceDigest {
    PieceDigest(*blake3::hash(data).as_bytes())
}

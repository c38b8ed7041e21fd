//! Reed–Solomon erasure coder over GF(2^8).

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::{EcError, ErasureCoder, ErasureParams, Result};

/// Systematic Reed–Solomon coder: the first `data_pieces` output shards are
/// the input data, followed by `parity_pieces` parity shards.
#[derive(Clone)]
pub struct RsCode {
    params: ErasureParams,
    rs: ReedSolomon,
}

impl RsCode {
    pub fn new(params: ErasureParams) -> Result<Self> {
        let rs = ReedSolomon::new(params.min_pieces(), params.parity_pieces as usize)
            .map_err(|e| EcError::Params(e.to_string()))?;
        Ok(Self { params, rs })
    }

    pub fn params(&self) -> ErasureParams {
        self.params
    }
}

impl ErasureCoder for RsCode {
    fn min_pieces(&self) -> usize {
        self.params.min_pieces()
    }

    fn num_pieces(&self) -> usize {
        self.params.num_pieces()
    }

    fn piece_size(&self) -> u64 {
        self.params.piece_size
    }

    fn encode_shards(&self, data: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if data.len() != self.min_pieces() {
            return Err(EcError::Encode(format!(
                "expected {} data shards, got {}",
                self.min_pieces(),
                data.len()
            )));
        }
        let piece_size = self.params.piece_size as usize;
        if let Some(shard) = data.iter().find(|s| s.len() != piece_size) {
            return Err(EcError::Encode(format!(
                "data shard of {} bytes, expected {}",
                shard.len(),
                piece_size
            )));
        }

        let mut shards = data;
        shards.resize(self.num_pieces(), vec![0u8; piece_size]);
        self.rs
            .encode(&mut shards)
            .map_err(|e| EcError::Encode(e.to_string()))?;
        Ok(shards)
    }
}

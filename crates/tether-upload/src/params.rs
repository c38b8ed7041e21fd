//! Upload parameter record.

use std::path::PathBuf;

use tether_ec::{CipherType, ErasureParams};

/// Options recognized by [`Uploader::upload_stream`](crate::Uploader).
///
/// `force`, `repair` and `dry_run` are mutually exclusive; `repair` opens
/// an existing file and rejects fresh erasure settings.
#[derive(Clone, Debug)]
pub struct UploadParams {
    /// Logical path the file lives under (required).
    pub path: String,
    /// Optional local-file hint, stored in the descriptor.
    pub source: Option<PathBuf>,
    /// Erasure shape; defaults from config when absent and not repairing.
    pub erasure: Option<ErasureParams>,
    /// Key derivation scheme for piece encryption.
    pub cipher: CipherType,
    /// Delete any existing file at the path first.
    pub force: bool,
    /// Open the existing file instead of creating one.
    pub repair: bool,
    /// Record piece digests without contacting hosts.
    pub dry_run: bool,
    /// Accepted for compatibility; the final partial chunk is always
    /// zero-padded here.
    pub disable_partial_chunk: bool,
}

impl UploadParams {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: None,
            erasure: None,
            cipher: CipherType::default(),
            force: false,
            repair: false,
            dry_run: false,
            disable_partial_chunk: false,
        }
    }

    pub fn with_erasure(mut self, erasure: ErasureParams) -> Self {
        self.erasure = Some(erasure);
        self
    }
}

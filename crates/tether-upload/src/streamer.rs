//! The upload driver.
//!
//! One driver call owns the producer side of an upload: validate the
//! parameter record, open or create the descriptor, then walk the stream
//! chunk by chunk. Each iteration grows the file (so the chunk slot
//! registers as needing repair), builds the work item, wraps the stream in
//! a fresh shard and either queues the item or drains the shard. The shard
//! completion signal serializes access to the upstream; a one-byte peek
//! decides whether another chunk follows.

use std::io;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, warn};

use tether_ec::{piece_digest, ErasureCoder, ErasureParams, MasterKey};
use tether_file::{CallerId, FileError, FileSet, TetherFile};
use tether_types::{FileMode, HostPublicKey};

use crate::chunk::UnfinishedChunk;
use crate::heap::UploadHeap;
use crate::params::UploadParams;
use crate::pool::{Contractor, Disruptor, NoDisruption, WorkerPool};
use crate::shard::{ShardError, SharedReader, StreamShard};
use crate::{Result, UploadError};

/// Permission bits for newly created files.
const DEFAULT_FILE_MODE: FileMode = 0o600;

/// Driver-level settings, usually derived from [`tether_config::Config`].
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Relax the contract-count pre-flight check (tests only).
    pub testing: bool,
    /// Data pieces used when the caller supplies no erasure settings.
    pub default_data_pieces: u32,
    /// Parity pieces used when the caller supplies no erasure settings.
    pub default_parity_pieces: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            testing: false,
            default_data_pieces: tether_config::DEFAULT_DATA_PIECES,
            default_parity_pieces: tether_config::DEFAULT_PARITY_PIECES,
        }
    }
}

impl From<&tether_config::Config> for UploadConfig {
    fn from(config: &tether_config::Config) -> Self {
        Self {
            testing: config.testing_mode(),
            default_data_pieces: config.upload.default_data_pieces,
            default_parity_pieces: config.upload.default_parity_pieces,
        }
    }
}

/// Streaming upload driver.
pub struct Uploader {
    fileset: Arc<FileSet>,
    heap: Arc<UploadHeap>,
    contractor: Arc<dyn Contractor>,
    workers: Arc<dyn WorkerPool>,
    disruptor: Arc<dyn Disruptor>,
    shutdown: watch::Receiver<bool>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(
        fileset: Arc<FileSet>,
        heap: Arc<UploadHeap>,
        contractor: Arc<dyn Contractor>,
        workers: Arc<dyn WorkerPool>,
        shutdown: watch::Receiver<bool>,
        config: UploadConfig,
    ) -> Self {
        Self {
            fileset,
            heap,
            contractor,
            workers,
            disruptor: Arc::new(NoDisruption),
            shutdown,
            config,
        }
    }

    /// Install a fault-injection hook.
    pub fn with_disruptor(mut self, disruptor: Arc<dyn Disruptor>) -> Self {
        self.disruptor = disruptor;
        self
    }

    /// Upload a stream and close the file reference when done.
    pub async fn upload_stream<R>(&self, params: UploadParams, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let caller = CallerId::next();
        let node = self.stream_to_network(params, reader, caller).await?;
        self.fileset.close(&node.path(), caller)?;
        Ok(())
    }

    /// Upload a stream, returning the open file reference as soon as the
    /// data is *available* on the network. That happens before the upload
    /// is complete: workers keep boosting redundancy in the background.
    /// The caller owns the `caller` reference and must close it.
    pub async fn stream_to_network<R>(
        &self,
        params: UploadParams,
        reader: R,
        caller: CallerId,
    ) -> Result<Arc<TetherFile>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let node = self.init_upload(&params, caller)?;
        match self.run_upload(&params, &node, reader).await {
            Ok(()) => Ok(node),
            Err(err) => {
                // Release the reference taken above; the partial placements
                // stay in the descriptor for repair to pick up.
                if let Err(close_err) = self.fileset.close(&node.path(), caller) {
                    warn!(path = %node.path(), error = %close_err, "failed to close file after upload error");
                }
                Err(err)
            }
        }
    }

    /// Validate the parameter record and produce the open descriptor the
    /// upload writes into.
    fn init_upload(&self, params: &UploadParams, caller: CallerId) -> Result<Arc<TetherFile>> {
        if params.erasure.is_some() && params.repair {
            return Err(UploadError::ConflictingOptions(
                "erasure settings cannot be supplied for repairs",
            ));
        }
        if params.force && params.repair {
            return Err(UploadError::ConflictingOptions(
                "'force' and 'repair' cannot both be set",
            ));
        }
        if params.dry_run && params.force {
            return Err(UploadError::ConflictingOptions(
                "'dry_run' and 'force' cannot both be set",
            ));
        }
        if params.dry_run && params.repair {
            return Err(UploadError::ConflictingOptions(
                "'dry_run' and 'repair' cannot both be set",
            ));
        }

        // Delete any existing file when overwriting; a missing file is fine.
        if params.force {
            match self.fileset.delete(&params.path) {
                Ok(()) | Err(FileError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if params.repair {
            return Ok(self.fileset.open(&params.path, caller)?);
        }

        let erasure = match params.erasure {
            Some(erasure) => erasure,
            None => ErasureParams::for_cipher(
                self.config.default_data_pieces,
                self.config.default_parity_pieces,
                params.cipher,
            )?,
        };

        // num_pieces = data + parity and min_pieces = data, so the floor is
        // (data + data + parity) / 2 = data + parity / 2 contracts.
        let have = self.contractor.contracts().len();
        let need = (erasure.num_pieces() + erasure.min_pieces()) / 2;
        if have < need && !self.config.testing {
            return Err(UploadError::InsufficientContracts { have, need });
        }

        let master_key = MasterKey::generate();
        Ok(self.fileset.new_file(
            &params.path,
            params.source.clone(),
            erasure,
            params.cipher,
            master_key,
            0,
            DEFAULT_FILE_MODE,
            caller,
        )?)
    }

    async fn run_upload<R>(
        &self,
        params: &UploadParams,
        node: &Arc<TetherFile>,
        reader: R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let upstream = SharedReader::new(reader);
        if params.dry_run {
            return self.dry_run(node, &upstream).await;
        }

        let worker_hosts = self.workers.hosts();
        let min_workers = node.min_pieces();
        if worker_hosts.len() < min_workers {
            return Err(UploadError::InsufficientWorkers {
                have: worker_hosts.len(),
                need: min_workers,
            });
        }

        let chunk_size = node.chunk_size() as usize;
        let mut shutdown = self.shutdown.clone();
        let mut carry: Option<u8> = None;
        let mut submitted: Vec<Arc<UnfinishedChunk>> = Vec::new();

        let mut chunk_index: u64 = 0;
        loop {
            // Simulate losing connectivity mid-upload.
            if self.disruptor.disrupt("disrupt_upload_stream") {
                upstream.close().await;
            }

            // Growing first is what makes the builder see this slot as
            // needing repair.
            node.grow_num_chunks(chunk_index + 1)?;
            let utils = self.contractor.host_utilities();
            let chunk = UnfinishedChunk::build(node, chunk_index, &worker_hosts, &utils)?;

            let shard = StreamShard::new(upstream.clone(), carry.take());
            chunk.set_source(shard.clone());

            if chunk.needs_work() {
                if self.heap.push(chunk.clone()) {
                    debug!(path = %node.path(), chunk = chunk_index, "queued chunk for upload");
                    submitted.push(chunk);
                } else {
                    // Already being repaired elsewhere. The bytes must
                    // still be consumed or the next shard would read the
                    // wrong chunk.
                    drain_shard(&shard, chunk_size).await;
                    shard.close();
                }
            } else {
                drain_shard(&shard, chunk_size).await;
                shard.close();
            }

            let mut signal = shard.signal();
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return Err(UploadError::Interrupted),
                result = signal.wait_for(|done| *done) => {
                    let _ = result;
                }
            }

            let (_, status) = shard.result().await;
            match status {
                Some(ShardError::Eof) | Some(ShardError::UnexpectedEof) => break,
                Some(ShardError::Closed) => return Err(UploadError::ShardClosed),
                Some(ShardError::Upstream(msg)) => return Err(UploadError::Stream(msg)),
                None => {}
            }

            // Probe for another chunk; the byte pulled here seeds the next
            // shard.
            match shard.peek().await {
                Ok(Some(byte)) => carry = Some(byte),
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(UploadError::Stream(e.to_string())),
            }
            chunk_index += 1;
        }

        // Block until every submitted chunk crosses the availability
        // threshold; the remaining parity finishes in the background.
        for chunk in submitted {
            let mut available = chunk.available_signal();
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return Err(UploadError::Interrupted),
                result = available.wait_for(|a| *a) => {
                    let _ = result;
                }
            }
            if let Some(msg) = chunk.error() {
                return Err(UploadError::PieceUpload(msg));
            }
        }

        if self.disruptor.disrupt("fail_upload_stream") {
            return Err(UploadError::PieceUpload("disrupted".into()));
        }
        debug!(path = %node.path(), chunks = chunk_index + 1, "upload available on network");
        Ok(())
    }

    /// Dry-run: no heap, no workers. Encode each chunk locally, record the
    /// piece digests under the blank host key and reconcile the file size
    /// with the true byte count.
    async fn dry_run(&self, node: &Arc<TetherFile>, upstream: &SharedReader) -> Result<()> {
        let coder = node.coder()?;
        let chunk_size = node.chunk_size();
        let blank = HostPublicKey::default();

        let mut chunk_index: u64 = 0;
        loop {
            node.grow_num_chunks(chunk_index + 1)?;

            let shard = StreamShard::new(upstream.clone(), None);
            let (data, total) = read_data_pieces(&shard, &coder).await?;
            let pieces = coder.encode_shards(data)?;
            for (piece_index, piece) in pieces.iter().enumerate() {
                node.add_piece(blank, chunk_index, piece_index as u32, piece_digest(piece))?;
            }
            node.set_file_size(chunk_index * chunk_size + total)?;
            shard.close();

            let (_, status) = shard.result().await;
            match status {
                Some(ShardError::Eof) | Some(ShardError::UnexpectedEof) => break,
                Some(ShardError::Closed) => return Err(UploadError::ShardClosed),
                Some(ShardError::Upstream(msg)) => return Err(UploadError::Stream(msg)),
                None => {}
            }
            chunk_index += 1;
        }
        Ok(())
    }
}

/// Read one chunk's data pieces from the shard. Pieces beyond the end of
/// the stream come back zero-padded; `total` is the byte count actually
/// read.
async fn read_data_pieces(
    shard: &StreamShard,
    coder: &dyn ErasureCoder,
) -> Result<(Vec<Vec<u8>>, u64)> {
    let piece_size = coder.piece_size() as usize;
    let mut pieces = Vec::with_capacity(coder.min_pieces());
    let mut total = 0u64;
    for _ in 0..coder.min_pieces() {
        let mut buf = vec![0u8; piece_size];
        let n = shard.read_full(&mut buf).await?;
        total += n as u64;
        pieces.push(buf);
    }
    Ok((pieces, total))
}

/// Consume and discard one chunk's worth of bytes.
async fn drain_shard(shard: &StreamShard, chunk_size: usize) {
    let mut buf = vec![0u8; chunk_size];
    let _ = shard.read_full(&mut buf).await;
}

/// Resolves when the shutdown flag flips. A dropped shutdown sender means
/// no shutdown will ever arrive, so the future just never resolves.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

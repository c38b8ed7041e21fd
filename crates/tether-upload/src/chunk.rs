//! Unfinished-chunk work items.
//!
//! An [`UnfinishedChunk`] describes the repair work one chunk still needs:
//! how many pieces exist on reachable hosts, how many the erasure shape
//! wants, and where the chunk's bytes come from. Workers report placements
//! back through it; the *available* signal fires once enough pieces are
//! durable for the chunk to be reconstructible.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use tether_file::{FileError, FileId, TetherFile};
use tether_types::{HostPublicKey, HostUtilities};

use crate::shard::StreamShard;

/// Heap deduplication key: one work item per (file, chunk) at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub file: FileId,
    pub index: u64,
}

#[derive(Default)]
struct ChunkProgress {
    placed: usize,
    err: Option<String>,
}

/// Work item for one chunk that has fewer pieces than the erasure shape
/// wants.
pub struct UnfinishedChunk {
    file: Arc<TetherFile>,
    index: u64,
    pieces_needed: usize,
    min_pieces: usize,
    pieces_completed: usize,
    source: Mutex<Option<Arc<StreamShard>>>,
    progress: Mutex<ChunkProgress>,
    available_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

impl UnfinishedChunk {
    /// Build the work item for `index`, growing the file first so the
    /// chunk slot exists and registers as needing repair. A piece counts as
    /// completed when it sits on a host the worker pool can reach and that
    /// is not offline.
    pub fn build(
        file: &Arc<TetherFile>,
        index: u64,
        worker_hosts: &HashSet<HostPublicKey>,
        utils: &HostUtilities,
    ) -> Result<Arc<Self>, FileError> {
        file.grow_num_chunks(index + 1)?;
        let pieces_completed = file.usable_piece_count(index, worker_hosts, utils)?;
        let (available_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            file: file.clone(),
            index,
            pieces_needed: file.num_pieces(),
            min_pieces: file.min_pieces(),
            pieces_completed,
            source: Mutex::new(None),
            progress: Mutex::new(ChunkProgress::default()),
            available_tx,
            done_tx,
        }))
    }

    pub fn id(&self) -> ChunkId {
        ChunkId {
            file: self.file.uid(),
            index: self.index,
        }
    }

    pub fn file(&self) -> &Arc<TetherFile> {
        &self.file
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn pieces_needed(&self) -> usize {
        self.pieces_needed
    }

    pub fn min_pieces(&self) -> usize {
        self.min_pieces
    }

    /// Pieces already placed on usable hosts when the item was built.
    /// Doubles as the heap priority: fewer completed pieces repair first.
    pub fn pieces_completed(&self) -> usize {
        self.pieces_completed
    }

    /// Admission test: false means the chunk is already fully placed and
    /// the driver only drains its shard.
    pub fn needs_work(&self) -> bool {
        self.pieces_completed < self.pieces_needed
    }

    /// Attach the shard the chunk's bytes come from.
    pub fn set_source(&self, shard: Arc<StreamShard>) {
        *self.source.lock().unwrap() = Some(shard);
    }

    pub fn source(&self) -> Option<Arc<StreamShard>> {
        self.source.lock().unwrap().clone()
    }

    /// Worker callback: one more piece is durably placed. Fires the
    /// *available* signal at `min_pieces` and the *done* signal at
    /// `pieces_needed`, both counting pieces that existed at build time.
    pub fn record_piece_placed(&self) {
        let mut progress = self.progress.lock().unwrap();
        progress.placed += 1;
        let total = self.pieces_completed + progress.placed;
        if total >= self.min_pieces {
            self.available_tx.send_replace(true);
        }
        if total >= self.pieces_needed {
            self.done_tx.send_replace(true);
        }
    }

    /// Worker callback: the chunk cannot be placed. The first failure
    /// sticks; both signals fire so no joiner hangs on a dead chunk.
    pub fn fail(&self, msg: impl Into<String>) {
        let mut progress = self.progress.lock().unwrap();
        progress.err.get_or_insert_with(|| msg.into());
        self.available_tx.send_replace(true);
        self.done_tx.send_replace(true);
    }

    pub fn error(&self) -> Option<String> {
        self.progress.lock().unwrap().err.clone()
    }

    /// Resolves to `true` once `min_pieces` pieces are placed (or the
    /// chunk failed).
    pub fn available_signal(&self) -> watch::Receiver<bool> {
        self.available_tx.subscribe()
    }

    /// Resolves to `true` once all `pieces_needed` pieces are placed.
    pub fn done_signal(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tether_ec::{CipherType, ErasureParams, MasterKey};
    use tether_file::{CallerId, FileSet};
    use tether_types::PieceDigest;

    fn host(b: u8) -> HostPublicKey {
        HostPublicKey::from_bytes([b; 32])
    }

    fn test_file(set: &FileSet) -> Arc<TetherFile> {
        set.new_file(
            "chunked",
            None,
            ErasureParams::new(2, 2, 16).unwrap(),
            CipherType::Plain,
            MasterKey::from_bytes([1u8; 32]),
            0,
            0o600,
            CallerId::next(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_grows_file_and_counts_pieces() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set);
        let workers: HashSet<_> = [host(0), host(1)].into();
        let utils = HostUtilities::default();

        file.add_piece(host(0), 0, 0, PieceDigest::default()).unwrap();
        file.add_piece(host(9), 0, 1, PieceDigest::default()).unwrap(); // unreachable host

        let chunk = UnfinishedChunk::build(&file, 2, &workers, &utils).unwrap();
        assert_eq!(file.num_chunks(), 3);
        assert_eq!(chunk.pieces_completed(), 0);
        assert!(chunk.needs_work());

        let chunk0 = UnfinishedChunk::build(&file, 0, &workers, &utils).unwrap();
        assert_eq!(chunk0.pieces_completed(), 1);
    }

    #[tokio::test]
    async fn test_signals_fire_at_thresholds() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set);
        let chunk =
            UnfinishedChunk::build(&file, 0, &HashSet::new(), &HostUtilities::default()).unwrap();

        let available = chunk.available_signal();
        let done = chunk.done_signal();
        assert!(!*available.borrow());

        chunk.record_piece_placed();
        assert!(!*available.borrow());
        chunk.record_piece_placed(); // min_pieces = 2
        assert!(*available.borrow());
        assert!(!*done.borrow());

        chunk.record_piece_placed();
        chunk.record_piece_placed(); // pieces_needed = 4
        assert!(*done.borrow());
        assert!(chunk.error().is_none());
    }

    #[tokio::test]
    async fn test_fail_sticks_and_releases_joiners() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set);
        let chunk =
            UnfinishedChunk::build(&file, 0, &HashSet::new(), &HostUtilities::default()).unwrap();

        chunk.fail("host rejected piece");
        chunk.fail("later failure");

        assert_eq!(chunk.error().as_deref(), Some("host rejected piece"));
        let mut available = chunk.available_signal();
        available.wait_for(|a| *a).await.unwrap();
    }
}

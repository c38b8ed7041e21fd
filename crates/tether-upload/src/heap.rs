//! Priority queue of unfinished chunks.
//!
//! Chunks with fewer completed pieces repair first. A hash set keyed by
//! `(file, chunk)` deduplicates pushes so the same chunk is never queued
//! twice; a bounded wake channel nudges the worker pool without ever
//! blocking the producer. The signal is level, not edge: a dropped token
//! is fine as long as one is pending.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::chunk::{ChunkId, UnfinishedChunk};

struct HeapEntry {
    chunk: Arc<UnfinishedChunk>,
}

impl HeapEntry {
    fn key(&self) -> (usize, ChunkId) {
        (self.chunk.pieces_completed(), self.chunk.id())
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; fewer completed pieces must sort
        // higher. Chunk id breaks ties for a total order.
        let (self_completed, self_id) = self.key();
        let (other_completed, other_id) = other.key();
        other_completed
            .cmp(&self_completed)
            .then_with(|| other_id.cmp(&self_id))
    }
}

struct HeapInner {
    heap: BinaryHeap<HeapEntry>,
    pending: HashSet<ChunkId>,
}

/// Repair queue shared between upload drivers and the worker pool.
pub struct UploadHeap {
    inner: Mutex<HeapInner>,
    wake_tx: mpsc::Sender<()>,
}

impl UploadHeap {
    /// Returns the heap and the wake channel the worker pool listens on.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        (
            Arc::new(Self {
                inner: Mutex::new(HeapInner {
                    heap: BinaryHeap::new(),
                    pending: HashSet::new(),
                }),
                wake_tx,
            }),
            wake_rx,
        )
    }

    /// Enqueue a chunk unless an equivalent item is already pending. On
    /// success one wake token is sent without blocking.
    pub fn push(&self, chunk: Arc<UnfinishedChunk>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pending.insert(chunk.id()) {
            trace!(id = ?chunk.id(), "duplicate chunk refused by upload heap");
            return false;
        }
        inner.heap.push(HeapEntry { chunk });
        drop(inner);
        let _ = self.wake_tx.try_send(());
        true
    }

    /// Hand the most urgent chunk to a worker.
    pub fn pop(&self) -> Option<Arc<UnfinishedChunk>> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.heap.pop()?;
        inner.pending.remove(&entry.chunk.id());
        Some(entry.chunk)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as StdHashSet;
    use tempfile::tempdir;
    use tether_ec::{CipherType, ErasureParams, MasterKey};
    use tether_file::{CallerId, FileSet, TetherFile};
    use tether_types::{HostPublicKey, HostUtilities, PieceDigest};

    fn test_file(set: &FileSet, path: &str) -> Arc<TetherFile> {
        set.new_file(
            path,
            None,
            ErasureParams::new(1, 2, 16).unwrap(),
            CipherType::Plain,
            MasterKey::from_bytes([1u8; 32]),
            0,
            0o600,
            CallerId::next(),
        )
        .unwrap()
    }

    fn build(file: &Arc<TetherFile>, index: u64) -> Arc<UnfinishedChunk> {
        UnfinishedChunk::build(file, index, &StdHashSet::new(), &HostUtilities::default()).unwrap()
    }

    #[tokio::test]
    async fn test_push_deduplicates() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set, "a");
        let (heap, mut wake) = UploadHeap::new();

        assert!(heap.push(build(&file, 0)));
        assert!(!heap.push(build(&file, 0)));
        assert_eq!(heap.len(), 1);
        assert!(wake.try_recv().is_ok());

        // Popping clears the dedup key, so the chunk can queue again.
        assert!(heap.pop().is_some());
        assert!(heap.push(build(&file, 0)));
    }

    #[tokio::test]
    async fn test_distinct_files_do_not_collide() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file_a = test_file(&set, "a");
        let file_b = test_file(&set, "b");
        let (heap, _wake) = UploadHeap::new();

        assert!(heap.push(build(&file_a, 0)));
        assert!(heap.push(build(&file_b, 0)));
        assert_eq!(heap.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_prefers_fewer_completed_pieces() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set, "a");
        let host = HostPublicKey::from_bytes([1u8; 32]);
        let workers: StdHashSet<_> = [host].into();
        let utils = HostUtilities::default();

        // Chunk 0 has one piece placed already; chunk 1 has none.
        file.grow_num_chunks(2).unwrap();
        file.add_piece(host, 0, 0, PieceDigest::default()).unwrap();
        let richer = UnfinishedChunk::build(&file, 0, &workers, &utils).unwrap();
        let poorer = UnfinishedChunk::build(&file, 1, &workers, &utils).unwrap();

        let (heap, _wake) = UploadHeap::new();
        heap.push(richer);
        heap.push(poorer);

        assert_eq!(heap.pop().unwrap().index(), 1);
        assert_eq!(heap.pop().unwrap().index(), 0);
        assert!(heap.pop().is_none());
    }

    #[tokio::test]
    async fn test_wake_token_dropped_when_full() {
        let dir = tempdir().unwrap();
        let set = FileSet::new(dir.path()).unwrap();
        let file = test_file(&set, "a");
        let (heap, mut wake) = UploadHeap::new();

        heap.push(build(&file, 0));
        heap.push(build(&file, 1));
        heap.push(build(&file, 2));

        // Channel capacity is one; the extra tokens were dropped.
        assert!(wake.try_recv().is_ok());
        assert!(wake.try_recv().is_err());
        assert_eq!(heap.len(), 3);
    }
}

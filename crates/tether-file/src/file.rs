//! Shared file descriptor.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use tether_ec::{CipherType, ErasureParams, MasterKey, RsCode};
use tether_types::{FileMode, HostPublicKey, PieceDigest};

use crate::metadata::{ChunkRecord, FileMetadata, PiecePlacement};
use crate::{persist, FileError, Result};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique descriptor identity, used to deduplicate upload work.
/// Not persisted; a reloaded file gets a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
    fn next() -> Self {
        Self(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// In-memory descriptor of one logical file.
///
/// All mutations are serialized under the internal mutex and persisted
/// before the mutex is released, so concurrent readers always observe
/// committed state. Handed out as `Arc<TetherFile>` by the registry;
/// renames and deletes through one reference are visible to all siblings.
#[derive(Debug)]
pub struct TetherFile {
    uid: FileId,
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    path: String,
    disk_path: PathBuf,
    meta: FileMetadata,
}

impl TetherFile {
    pub(crate) fn create(path: String, disk_path: PathBuf, meta: FileMetadata) -> Result<Arc<Self>> {
        persist::save_metadata(&disk_path, &meta)?;
        debug!(path = %path, "created file descriptor");
        Ok(Arc::new(Self {
            uid: FileId::next(),
            state: Mutex::new(FileState {
                path,
                disk_path,
                meta,
            }),
        }))
    }

    pub(crate) fn load(path: String, disk_path: PathBuf) -> Result<Arc<Self>> {
        let meta = persist::load_metadata(&disk_path)?;
        Ok(Arc::new(Self {
            uid: FileId::next(),
            state: Mutex::new(FileState {
                path,
                disk_path,
                meta,
            }),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap()
    }

    fn save(&self, state: &FileState) -> Result<()> {
        // A deleted descriptor has no on-disk representation to update.
        if state.meta.deleted {
            return Ok(());
        }
        persist::save_metadata(&state.disk_path, &state.meta)
    }

    // ========== Accessors ==========

    pub fn uid(&self) -> FileId {
        self.uid
    }

    /// Current logical path; follows renames.
    pub fn path(&self) -> String {
        self.lock().path.clone()
    }

    pub fn disk_path(&self) -> PathBuf {
        self.lock().disk_path.clone()
    }

    pub fn size(&self) -> u64 {
        self.lock().meta.size
    }

    pub fn mode(&self) -> FileMode {
        self.lock().meta.mode
    }

    pub fn deleted(&self) -> bool {
        self.lock().meta.deleted
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        self.lock().meta.local_path.clone()
    }

    pub fn creation_time(&self) -> u64 {
        self.lock().meta.creation_time
    }

    pub fn erasure(&self) -> ErasureParams {
        self.lock().meta.erasure
    }

    pub fn cipher(&self) -> CipherType {
        self.lock().meta.cipher
    }

    pub fn master_key(&self) -> MasterKey {
        self.lock().meta.master_key
    }

    pub fn num_chunks(&self) -> u64 {
        self.lock().meta.chunks.len() as u64
    }

    pub fn piece_size(&self) -> u64 {
        self.lock().meta.piece_size()
    }

    pub fn chunk_size(&self) -> u64 {
        self.lock().meta.chunk_size()
    }

    pub fn num_pieces(&self) -> usize {
        self.lock().meta.num_pieces()
    }

    pub fn min_pieces(&self) -> usize {
        self.lock().meta.min_pieces()
    }

    /// Coder matching this file's erasure shape.
    pub fn coder(&self) -> tether_ec::Result<RsCode> {
        RsCode::new(self.erasure())
    }

    /// Snapshot of a chunk's piece table.
    pub fn chunk(&self, chunk_index: u64) -> Result<ChunkRecord> {
        let state = self.lock();
        state
            .meta
            .chunks
            .get(chunk_index as usize)
            .cloned()
            .ok_or_else(|| FileError::OutOfRange(format!("chunk {chunk_index}")))
    }

    // ========== Mutations ==========

    /// Extend the chunk table so the file covers at least `n` chunks.
    /// A no-op when the file already has `n` or more chunks. Growth bumps
    /// the logical size to the padded chunk boundary.
    pub fn grow_num_chunks(&self, n: u64) -> Result<()> {
        let mut state = self.lock();
        if state.meta.chunks.len() as u64 >= n {
            return Ok(());
        }
        let num_pieces = state.meta.num_pieces();
        while (state.meta.chunks.len() as u64) < n {
            state.meta.chunks.push(ChunkRecord::new(num_pieces));
        }
        state.meta.size = state.meta.chunks.len() as u64 * state.meta.chunk_size();
        self.save(&state)
    }

    /// Record that `host` stores piece `piece_index` of chunk `chunk_index`.
    /// Duplicate `(host, chunk, piece)` placements overwrite the digest.
    pub fn add_piece(
        &self,
        host: HostPublicKey,
        chunk_index: u64,
        piece_index: u32,
        digest: PieceDigest,
    ) -> Result<()> {
        let mut state = self.lock();
        let num_pieces = state.meta.num_pieces();
        let num_chunks = state.meta.chunks.len() as u64;
        if chunk_index >= num_chunks {
            return Err(FileError::OutOfRange(format!(
                "chunk {chunk_index} >= {num_chunks}"
            )));
        }
        if piece_index as usize >= num_pieces {
            return Err(FileError::OutOfRange(format!(
                "piece {piece_index} >= {num_pieces}"
            )));
        }
        let placements = &mut state.meta.chunks[chunk_index as usize].pieces[piece_index as usize];
        match placements.iter_mut().find(|p| p.host == host) {
            Some(existing) => existing.digest = digest,
            None => placements.push(PiecePlacement { host, digest }),
        }
        self.save(&state)
    }

    /// Union of hosts storing any piece of this file.
    pub fn host_public_keys(&self) -> HashSet<HostPublicKey> {
        let state = self.lock();
        state
            .meta
            .chunks
            .iter()
            .flat_map(|c| c.pieces.iter())
            .flat_map(|p| p.iter())
            .map(|p| p.host)
            .collect()
    }

    pub fn set_local_path(&self, local_path: Option<PathBuf>) -> Result<()> {
        let mut state = self.lock();
        state.meta.local_path = local_path;
        self.save(&state)
    }

    /// Reconcile the logical size with the true byte count after streaming.
    pub fn set_file_size(&self, size: u64) -> Result<()> {
        let mut state = self.lock();
        state.meta.size = size;
        self.save(&state)
    }

    /// Move the descriptor to a new logical path and on-disk location.
    /// The metadata file moves atomically; sibling references observe the
    /// new path on their next query.
    pub(crate) fn rename(&self, new_path: &str, new_disk_path: PathBuf) -> Result<()> {
        let mut state = self.lock();
        if state.meta.deleted {
            return Err(FileError::Deleted);
        }
        if let Some(parent) = new_disk_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&state.disk_path, &new_disk_path)?;
        debug!(old = %state.path, new = %new_path, "renamed file descriptor");
        state.path = new_path.to_string();
        state.disk_path = new_disk_path;
        Ok(())
    }

    /// Remove the on-disk metadata and mark the descriptor deleted.
    /// Sibling references stay valid and observe `deleted() == true`.
    pub(crate) fn delete(&self) -> Result<()> {
        let mut state = self.lock();
        match std::fs::remove_file(&state.disk_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        state.meta.deleted = true;
        debug!(path = %state.path, "deleted file descriptor");
        Ok(())
    }

    /// Run `f` against the metadata snapshot under the descriptor mutex.
    pub(crate) fn with_meta<T>(&self, f: impl FnOnce(&FileMetadata) -> T) -> T {
        f(&self.lock().meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_file(dir: &std::path::Path, size: u64) -> Arc<TetherFile> {
        let erasure = ErasureParams::new(2, 1, 16).unwrap();
        let meta = FileMetadata::new(
            erasure,
            CipherType::Plain,
            MasterKey::from_bytes([3u8; 32]),
            size,
            0o600,
        );
        TetherFile::create("test".into(), dir.join("test.tether"), meta).unwrap()
    }

    #[test]
    fn test_grow_is_idempotent_and_bumps_size() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 0);
        assert_eq!(f.num_chunks(), 1);
        assert_eq!(f.size(), 0);

        f.grow_num_chunks(3).unwrap();
        assert_eq!(f.num_chunks(), 3);
        assert_eq!(f.size(), 3 * f.chunk_size());

        // Growing to fewer chunks changes nothing.
        f.grow_num_chunks(1).unwrap();
        assert_eq!(f.num_chunks(), 3);
        assert_eq!(f.size(), 3 * f.chunk_size());
    }

    #[test]
    fn test_add_piece_bounds() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 0);
        let host = HostPublicKey::from_bytes([1u8; 32]);

        assert!(matches!(
            f.add_piece(host, 1, 0, PieceDigest::default()),
            Err(FileError::OutOfRange(_))
        ));
        assert!(matches!(
            f.add_piece(host, 0, 3, PieceDigest::default()),
            Err(FileError::OutOfRange(_))
        ));
        f.add_piece(host, 0, 0, PieceDigest::default()).unwrap();
    }

    #[test]
    fn test_duplicate_placement_overwrites_digest() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 0);
        let host = HostPublicKey::from_bytes([1u8; 32]);

        f.add_piece(host, 0, 0, PieceDigest([1u8; 32])).unwrap();
        f.add_piece(host, 0, 0, PieceDigest([2u8; 32])).unwrap();

        let chunk = f.chunk(0).unwrap();
        assert_eq!(chunk.pieces[0].len(), 1);
        assert_eq!(chunk.pieces[0][0].digest, PieceDigest([2u8; 32]));
    }

    #[test]
    fn test_host_public_keys_union() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 0);
        let a = HostPublicKey::from_bytes([1u8; 32]);
        let b = HostPublicKey::from_bytes([2u8; 32]);

        f.grow_num_chunks(2).unwrap();
        f.add_piece(a, 0, 0, PieceDigest::default()).unwrap();
        f.add_piece(b, 1, 1, PieceDigest::default()).unwrap();
        f.add_piece(a, 1, 2, PieceDigest::default()).unwrap();

        let hosts = f.host_public_keys();
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains(&a) && hosts.contains(&b));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 40);
        let host = HostPublicKey::from_bytes([1u8; 32]);
        f.add_piece(host, 0, 1, PieceDigest([7u8; 32])).unwrap();
        f.set_local_path(Some("/tmp/source.bin".into())).unwrap();

        let loaded = TetherFile::load("test".into(), dir.path().join("test.tether")).unwrap();
        assert_eq!(loaded.size(), 40);
        assert_eq!(loaded.num_chunks(), f.num_chunks());
        assert_eq!(loaded.local_path(), Some("/tmp/source.bin".into()));
        assert_eq!(loaded.chunk(0).unwrap(), f.chunk(0).unwrap());
        // Identity is per-instance, never persisted.
        assert_ne!(loaded.uid(), f.uid());
    }

    #[test]
    fn test_delete_is_idempotent_on_disk() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 0);
        f.delete().unwrap();
        assert!(f.deleted());
        assert!(!dir.path().join("test.tether").exists());
        // Mutations after delete no longer touch the disk.
        f.set_file_size(10).unwrap();
        assert!(!dir.path().join("test.tether").exists());
    }
}

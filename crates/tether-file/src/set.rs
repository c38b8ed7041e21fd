//! Reference-counted registry of open file descriptors.
//!
//! Every logical path maps to at most one live descriptor; concurrent
//! callers opening the same path share it. An entry is evicted when the
//! last caller closes it. Deleted descriptors stay registered (invisible to
//! `open`) until the last close so sibling references keep observing a
//! consistent deleted view instead of a dangling path.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use tether_ec::{CipherType, ErasureParams, MasterKey};
use tether_types::FileMode;

use crate::file::TetherFile;
use crate::metadata::FileMetadata;
use crate::{FileError, Result};

/// Extension of persisted metadata files.
pub const METADATA_EXT: &str = "tether";

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one caller context holding a registry reference. Each
/// distinct holder uses its own id; `close` fails for ids that never
/// opened the path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

impl CallerId {
    pub fn next() -> Self {
        Self(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry {
    node: Arc<TetherFile>,
    callers: HashSet<CallerId>,
}

/// Registry mapping logical paths to shared descriptors.
pub struct FileSet {
    files_dir: PathBuf,
    entries: Mutex<HashMap<String, Entry>>,
}

impl FileSet {
    pub fn new(files_dir: impl Into<PathBuf>) -> Result<Self> {
        let files_dir = files_dir.into();
        std::fs::create_dir_all(&files_dir)?;
        Ok(Self {
            files_dir,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn disk_path(&self, path: &str) -> PathBuf {
        self.files_dir.join(format!("{path}.{METADATA_EXT}"))
    }

    /// Create a new file, persist it, and register it with `caller` as the
    /// first reference. Fails with *path-in-use* when the path is already
    /// registered or exists on disk.
    #[allow(clippy::too_many_arguments)]
    pub fn new_file(
        &self,
        path: &str,
        source: Option<PathBuf>,
        erasure: ErasureParams,
        cipher: CipherType,
        master_key: MasterKey,
        size: u64,
        mode: FileMode,
        caller: CallerId,
    ) -> Result<Arc<TetherFile>> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(path) || self.disk_path(path).exists() {
            return Err(FileError::PathInUse(path.to_string()));
        }
        let mut meta = FileMetadata::new(erasure, cipher, master_key, size, mode);
        meta.local_path = source;
        let node = TetherFile::create(path.to_string(), self.disk_path(path), meta)?;
        entries.insert(
            path.to_string(),
            Entry {
                node: node.clone(),
                callers: HashSet::from([caller]),
            },
        );
        Ok(node)
    }

    /// Open an existing file, loading it from disk if it is not already in
    /// memory. Deleted entries are invisible.
    pub fn open(&self, path: &str, caller: CallerId) -> Result<Arc<TetherFile>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            if entry.node.deleted() {
                return Err(FileError::NotFound(path.to_string()));
            }
            entry.callers.insert(caller);
            return Ok(entry.node.clone());
        }
        let disk_path = self.disk_path(path);
        if !disk_path.exists() {
            return Err(FileError::NotFound(path.to_string()));
        }
        let node = TetherFile::load(path.to_string(), disk_path)?;
        debug!(path = %path, "loaded file descriptor from disk");
        entries.insert(
            path.to_string(),
            Entry {
                node: node.clone(),
                callers: HashSet::from([caller]),
            },
        );
        Ok(node)
    }

    /// Drop `caller`'s reference to `path`. The entry is evicted when the
    /// last reference goes; the descriptor itself may outlive eviction
    /// through `Arc`s held by callers.
    pub fn close(&self, path: &str, caller: CallerId) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| FileError::NotOpen(path.to_string()))?;
        if !entry.callers.remove(&caller) {
            return Err(FileError::NotOpen(path.to_string()));
        }
        if entry.callers.is_empty() {
            entries.remove(path);
        }
        Ok(())
    }

    /// Atomically move a file to a new logical path, on disk and in the
    /// registry. In-flight references stay valid and observe the new path.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(new) || self.disk_path(new).exists() {
            return Err(FileError::PathInUse(new.to_string()));
        }
        if let Some(entry) = entries.remove(old) {
            if entry.node.deleted() {
                entries.insert(old.to_string(), entry);
                return Err(FileError::NotFound(old.to_string()));
            }
            if let Err(e) = entry.node.rename(new, self.disk_path(new)) {
                entries.insert(old.to_string(), entry);
                return Err(e);
            }
            entries.insert(new.to_string(), entry);
            return Ok(());
        }
        let disk_old = self.disk_path(old);
        if !disk_old.exists() {
            return Err(FileError::NotFound(old.to_string()));
        }
        let node = TetherFile::load(old.to_string(), disk_old)?;
        node.rename(new, self.disk_path(new))
    }

    /// Remove a file from disk and mark its descriptor deleted. Existing
    /// references stay valid; subsequent opens fail with *not-found*.
    pub fn delete(&self, path: &str) -> Result<()> {
        let entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(path) {
            if entry.node.deleted() {
                return Err(FileError::NotFound(path.to_string()));
            }
            return entry.node.delete();
        }
        let disk_path = self.disk_path(path);
        if !disk_path.exists() {
            return Err(FileError::NotFound(path.to_string()));
        }
        std::fs::remove_file(&disk_path)?;
        Ok(())
    }

    /// Logical paths of the live (non-deleted) registered files.
    pub fn paths(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|(_, e)| !e.node.deleted())
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Number of registered entries, deleted ones included. Drops to zero
    /// once every caller has closed.
    pub fn open_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Reference count of one path, zero when not registered.
    pub fn ref_count(&self, path: &str) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.get(path).map(|e| e.callers.len()).unwrap_or(0)
    }
}

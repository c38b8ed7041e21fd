//! Crash-atomic metadata persistence.
//!
//! Writes go to a sibling temp file and replace the live file with a single
//! `rename`, so a crash leaves either the old or the new metadata, never a
//! torn file. Saves are serialized per descriptor by its state mutex.

use std::path::{Path, PathBuf};

use crate::metadata::FileMetadata;
use crate::Result;

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

pub(crate) fn save_metadata(path: &Path, meta: &FileMetadata) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(meta)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn load_metadata(path: &Path) -> Result<FileMetadata> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

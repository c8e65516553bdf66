use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{CoreError, Result};

pub(crate) fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CoreError::read_failure(path, e))
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Writes through a temporary file in the destination directory and renames it
/// over `path`, so readers never observe a partially written artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?.commit()
}

/// Fully written temporary file waiting to be renamed over its destination.
/// Dropping it without committing removes the temporary file.
pub(crate) struct StagedWrite {
    tmp: NamedTempFile,
    path: PathBuf,
    len: usize,
}

pub(crate) fn stage(path: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let dir = parent_dir(path);
    let mut tmp = tempfile::Builder::new()
        .prefix(".dcsm_")
        .suffix(".part")
        .tempfile_in(&dir)
        .map_err(|e| CoreError::io(&dir, e))?;
    tmp.write_all(bytes).map_err(|e| CoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CoreError::io(tmp.path(), e))?;
    Ok(StagedWrite {
        tmp,
        path: path.to_path_buf(),
        len: bytes.len(),
    })
}

impl StagedWrite {
    pub(crate) fn commit(self) -> Result<()> {
        let Self { tmp, path, len } = self;
        tmp.persist(&path)
            .map_err(|e| CoreError::io(&path, e.error))?;
        log::debug!("wrote {len} bytes to {}", path.display());
        Ok(())
    }
}

/// Puts `previous` back at `path` after a later step of a multi-file write
/// failed. `None` means the file did not exist before.
pub(crate) fn restore(path: &Path, previous: Option<&[u8]>) {
    let restored = match previous {
        Some(bytes) => write_atomic(path, bytes),
        None => remove_if_exists(path),
    };
    if let Err(e) = restored {
        log::warn!("could not restore {}: {e}", path.display());
    }
}

/// Current contents of `path`, or `None` when it does not exist.
pub(crate) fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Removes a file, treating an already absent file as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

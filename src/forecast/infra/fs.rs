//! File helpers shared by the feature store, model registry and report store.
//!
//! - Promotion of a "latest" file is write-to-`.tmp` then `fs::rename`, so a
//!   concurrent reader sees either the previous or the new file, never a mix.
//! - Audit copies are created with `create_new` and never overwritten.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, StorageError};

/// Create a directory (and parents) if missing.
pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

/// Atomically replace `path` with `contents`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    StagedWrite::stage(path, contents)?.promote()
}

/// A fully written `.tmp` sibling waiting to be renamed over its target.
///
/// Lets a caller do all the writing that can fail before committing
/// elsewhere, leaving only the rename afterwards. Dropped without
/// [`promote`](Self::promote), the tmp file is removed.
#[derive(Debug)]
pub(crate) struct StagedWrite {
    tmp_path: PathBuf,
    target: PathBuf,
    promoted: bool,
}

impl StagedWrite {
    pub(crate) fn stage(path: &Path, contents: &[u8]) -> Result<Self> {
        let tmp_path = tmp_path(path);
        fs::write(&tmp_path, contents).map_err(|e| Error::io(&tmp_path, e))?;
        Ok(Self {
            tmp_path,
            target: path.to_path_buf(),
            promoted: false,
        })
    }

    pub(crate) fn promote(mut self) -> Result<()> {
        fs::rename(&self.tmp_path, &self.target).map_err(|e| Error::io(&self.target, e))?;
        self.promoted = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.promoted {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                debug!(path = %self.tmp_path.display(), error = %e, "Staged file already gone");
            }
        }
    }
}

/// Write an immutable file. Fails if `path` already exists.
pub(crate) fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::Storage(StorageError::BackupExists(path.display().to_string()))
            } else {
                Error::io(path, e)
            }
        })?;
    file.write_all(contents).map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Exclusive writer lock backed by a lock file.
///
/// Held for the duration of a write cycle and released on drop. A second
/// writer gets [`StorageError::Locked`] instead of blocking.
///
/// A process killed mid-cycle leaves the file behind. The file holds the
/// owner's pid; once that process is confirmed gone, deleting the file
/// releases the store. Nothing was promoted by the dead writer unless its
/// commit finished, so the store itself needs no repair.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Try to take the lock at `path`.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::Storage(StorageError::Locked(path.display().to_string()))
                } else {
                    Error::io(path, e)
                }
            })?;
        if let Err(e) = write_owner(&mut file, path) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove unwritten lock file");
            }
            return Err(e);
        }
        debug!(path = %path.display(), "Writer lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Owner pid, for humans clearing a stale lock.
fn write_owner<W: Write>(out: &mut W, path: &Path) -> Result<()> {
    writeln!(out, "{}", std::process::id())
        .and_then(|()| out.flush())
        .map_err(|e| Error::io(path, e))
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release writer lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"v\":2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\":2}");
        assert!(!dir.path().join("latest.json.tmp").exists());
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.jsonl");
        write_new(&path, b"first").unwrap();

        let err = write_new(&path, b"second").unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::BackupExists(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lock_owner_write_error_propagates() {
        let path = Path::new(".writer.lock");
        let err = write_owner(&mut FullDisk, path).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Io { .. })));

        let mut buf = Vec::new();
        write_owner(&mut buf, path).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_staged_write_is_invisible_until_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.json");
        write_atomic(&path, b"old").unwrap();

        let staged = StagedWrite::stage(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        staged.promote().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        drop(StagedWrite::stage(&path, b"abandoned").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join("latest.json.tmp").exists());
    }

    #[test]
    fn test_writer_lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".writer.lock");

        let lock = WriterLock::acquire(&path).unwrap();
        let second = WriterLock::acquire(&path);
        assert!(matches!(
            second,
            Err(Error::Storage(StorageError::Locked(_)))
        ));

        drop(lock);
        assert!(!path.exists());
        assert!(WriterLock::acquire(&path).is_ok());
    }
}

//! Staging files for extracted members.
//!
//! The manager keeps a ledger of every file it hands out. A branch releases
//! its own allocation when it is done with it; whatever is still on the
//! ledger when the session ends (for example because the branch was dropped
//! on timeout) is removed by [`TempFileManager::release_all`]. Anything left
//! after that is removed when the manager itself is dropped.

use crate::error::TempFileError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Prefix of every staging file name.
pub const TEMP_PREFIX: &str = "unpacker-";

/// A leased staging file.
#[derive(Debug)]
pub struct TempAllocation {
    id: u64,
    path: PathBuf,
    file: Option<File>,
}

impl TempAllocation {
    /// Filesystem path of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the open handle as an async writer.
    ///
    /// The handle can be taken once; dropping the writer closes it.
    pub fn take_writer(&mut self) -> Result<tokio::fs::File, TempFileError> {
        self.file
            .take()
            .map(tokio::fs::File::from_std)
            .ok_or_else(|| TempFileError::Io {
                path: self.path.clone(),
                source: io::Error::other("handle already taken"),
            })
    }
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TempStats {
    /// Files created
    pub allocated: usize,
    /// Files removed (or found already gone)
    pub released: usize,
}

impl TempStats {
    /// Files still on disk.
    pub fn outstanding(&self) -> usize {
        self.allocated.saturating_sub(self.released)
    }
}

/// Creates, tracks and removes staging files in one directory.
#[derive(Debug)]
pub struct TempFileManager {
    dir: PathBuf,
    ledger: Mutex<HashMap<u64, PathBuf>>,
    next_id: AtomicU64,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl TempFileManager {
    /// Create a manager placing files in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ledger: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Directory files are created in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new uniquely named, empty staging file.
    ///
    /// # Errors
    ///
    /// Returns `TempFileError::Allocate` when the directory cannot provide a
    /// unique file.
    pub fn allocate(&self) -> Result<TempAllocation, TempFileError> {
        let allocate_err = |source| TempFileError::Allocate {
            dir: self.dir.clone(),
            source,
        };

        let (file, path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(allocate_err)?
            .keep()
            .map_err(|e| allocate_err(e.error))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ledger.lock().insert(id, path.clone());
        self.allocated.fetch_add(1, Ordering::Relaxed);
        debug!("created tmp file: {}", path.display());

        Ok(TempAllocation {
            id,
            path,
            file: Some(file),
        })
    }

    /// Close the handle, then remove the file.
    ///
    /// Releasing an allocation that `release_all` already retired only closes
    /// the handle.
    pub async fn release(&self, allocation: TempAllocation) {
        let TempAllocation { id, path, file } = allocation;
        drop(file);

        if self.ledger.lock().remove(&id).is_none() {
            return;
        }
        self.remove(&path).await;
    }

    /// Remove every file still on the ledger.
    ///
    /// Every removal is attempted; individual failures are logged and a file
    /// that is already gone counts as released.
    pub async fn release_all(&self) {
        let pending: Vec<PathBuf> = {
            let mut ledger = self.ledger.lock();
            ledger.drain().map(|(_, path)| path).collect()
        };

        for path in pending {
            self.remove(&path).await;
        }
    }

    /// Allocation and release counters.
    pub fn stats(&self) -> TempStats {
        TempStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }

    async fn remove(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("deleted tempfile: {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("tempfile already gone: {}", path.display())
            }
            Err(e) => warn!("failed to delete tempfile {}: {}", path.display(), e),
        }
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        for (_, path) in self.ledger.get_mut().drain() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to delete tempfile {}: {}", path.display(), e);
                }
            }
            *self.released.get_mut() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_allocate_and_release() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());

        let mut alloc = manager.allocate().unwrap();
        assert!(alloc.path().starts_with(dir.path()));
        assert!(alloc.path().exists());

        let mut writer = alloc.take_writer().unwrap();
        writer.write_all(b"payload").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);
        assert_eq!(std::fs::read(alloc.path()).unwrap(), b"payload");

        let path = alloc.path().to_path_buf();
        manager.release(alloc).await;
        assert!(!path.exists());
        assert_eq!(
            manager.stats(),
            TempStats {
                allocated: 1,
                released: 1
            }
        );
    }

    #[tokio::test]
    async fn test_writer_taken_once() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());
        let mut alloc = manager.allocate().unwrap();

        assert!(alloc.take_writer().is_ok());
        assert!(alloc.take_writer().is_err());
        manager.release(alloc).await;
    }

    #[tokio::test]
    async fn test_release_all_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path());

        let a = manager.allocate().unwrap();
        let b = manager.allocate().unwrap();
        std::fs::remove_file(a.path()).unwrap();

        manager.release_all().await;
        assert!(!b.path().exists());
        assert_eq!(manager.stats().outstanding(), 0);

        // Late release after release_all is a no-op
        manager.release(a).await;
        manager.release(b).await;
        assert_eq!(manager.stats().released, 2);
    }

    #[tokio::test]
    async fn test_drop_removes_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = {
            let manager = TempFileManager::new(dir.path());
            let alloc = manager.allocate().unwrap();
            alloc.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_allocate_in_missing_dir_fails() {
        let manager = TempFileManager::new("/nonexistent/unpacker/dir");
        assert!(matches!(
            manager.allocate(),
            Err(TempFileError::Allocate { .. })
        ));
    }
}

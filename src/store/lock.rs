use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::{Error, Result};

/// Selects how a document's lock file is honored.
///
/// Advisory locking is the default and the only mode that is safe across
/// processes. [`LockBackend::None`] exists for filesystems where advisory
/// locks are unreliable (some network mounts); in that mode concurrent access
/// is only safe from within a single process, and callers opt into that
/// reduced guarantee explicitly at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockBackend {
    /// Blocking OS advisory locks on the `<name>.lock` companion file.
    #[default]
    Advisory,
    /// No locking. Single-process safety only.
    None,
}

/// Acquires per-document advisory locks: shared for readers, exclusive for
/// writers. One manager exists per [`DocumentStore`](crate::DocumentStore);
/// no descriptor is cached across calls.
#[derive(Debug)]
pub struct LockManager {
    lock_path: PathBuf,
    backend: LockBackend,
}

/// A held lock. Unlocks on drop; unlock and close failures are swallowed,
/// since the OS releases advisory locks when the descriptor closes anyway.
pub struct LockGuard {
    file: Option<File>,
}

impl LockManager {
    pub fn new<P: Into<PathBuf>>(lock_path: P, backend: LockBackend) -> Self {
        Self {
            lock_path: lock_path.into(),
            backend,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Blocks until the lock is granted, creating the parent directory and
    /// the zero-length lock file if they are missing.
    ///
    /// There is no timeout and no retry: if the syscall itself errors, the
    /// half-opened descriptor is closed and the error propagates.
    pub fn acquire(&self, shared: bool) -> Result<LockGuard> {
        if self.backend == LockBackend::None {
            return Ok(LockGuard { file: None });
        }

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.lock_path)?;

        let locked = if shared {
            file.lock_shared()
        } else {
            file.lock_exclusive()
        };
        if let Err(source) = locked {
            // `file` drops here, closing the descriptor before the error surfaces.
            return Err(Error::Lock {
                path: self.lock_path.clone(),
                source,
            });
        }

        Ok(LockGuard { file: Some(file) })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                debug!("ignoring unlock failure: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("doc.json.lock");
        let manager = LockManager::new(&lock_path, LockBackend::Advisory);

        let guard = manager.acquire(false).unwrap();
        assert!(lock_path.exists());
        drop(guard);

        // Reacquire after release.
        let _guard = manager.acquire(true).unwrap();
    }

    #[test]
    fn test_acquire_creates_missing_parent_dir() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("nested").join("doc.json.lock");
        let manager = LockManager::new(&lock_path, LockBackend::Advisory);

        let _guard = manager.acquire(false).unwrap();
        assert!(lock_path.exists());
    }

    #[test]
    fn test_shared_locks_overlap() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("doc.json.lock");
        let manager = LockManager::new(&lock_path, LockBackend::Advisory);

        let a = manager.acquire(true).unwrap();
        let b = manager.acquire(true).unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_noop_backend_touches_nothing() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("doc.json.lock");
        let manager = LockManager::new(&lock_path, LockBackend::None);

        let _guard = manager.acquire(false).unwrap();
        assert!(!lock_path.exists());
    }
}

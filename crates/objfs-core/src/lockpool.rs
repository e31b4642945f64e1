//! Lock Pool (spec §4.4).
//!
//! Process-local registry mapping an absolute metadata path to a
//! reference-counted shared-read lock or an exclusive write lock on the
//! underlying file. The map is guarded by a short, non-blocking critical
//! section; all I/O happens outside it, and every acquire is non-blocking
//! at the pool level — contention surfaces as a retryable error rather
//! than a queued wait, so the pool can never deadlock internally.

use crate::error::{Result, StorageError, io_to_storage_error};
use nix::fcntl::{FlockArg, flock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shared,
    Exclusive,
}

struct Entry {
    mode: Mode,
    refcount: usize,
    file: Arc<File>,
}

/// Take a non-blocking advisory `flock`. The lock is released implicitly
/// when every fd pointing at this open file description is closed, so no
/// separate unlock call is needed — dropping the `File` is enough.
fn take_flock(file: &File, exclusive: bool) -> std::io::Result<()> {
    let arg = if exclusive {
        FlockArg::LockExclusiveNonblock
    } else {
        FlockArg::LockSharedNonblock
    };
    flock(file.as_fd(), arg).map_err(std::io::Error::from)
}

#[derive(Default)]
pub struct LockPool {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

/// A shared-read handle. Dropping it decrements the refcount; the last
/// releaser drops the advisory lock and closes the file.
pub struct SharedGuard {
    pool: Arc<LockPool>,
    path: PathBuf,
    pub file: Arc<File>,
}

impl Drop for SharedGuard {
    fn drop(&mut self) {
        self.pool.close(&self.path);
    }
}

/// An exclusive handle. The holder closes it directly; no refcounting.
pub struct ExclusiveGuard {
    pool: Arc<LockPool>,
    path: PathBuf,
    pub file: Arc<File>,
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.pool.release_exclusive(&self.path);
    }
}

impl LockPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// First acquirer opens the file for reading and takes a shared
    /// advisory lock; subsequent acquirers increment a refcount and reuse
    /// the handle. Fails with a conflict error if an exclusive holder
    /// currently owns the path.
    pub fn open(self: &Arc<Self>, path: &Path) -> Result<SharedGuard> {
        let mut map = self.entries.lock();
        if let Some(entry) = map.get_mut(path) {
            match entry.mode {
                Mode::Exclusive => {
                    return Err(conflict(path));
                }
                Mode::Shared => {
                    entry.refcount += 1;
                    return Ok(SharedGuard {
                        pool: Arc::clone(self),
                        path: path.to_path_buf(),
                        file: Arc::clone(&entry.file),
                    });
                }
            }
        }
        let file = File::open(path).map_err(io_to_storage_error)?;
        take_flock(&file, false).map_err(|_| conflict(path))?;
        let file = Arc::new(file);
        map.insert(
            path.to_path_buf(),
            Entry {
                mode: Mode::Shared,
                refcount: 1,
                file: Arc::clone(&file),
            },
        );
        Ok(SharedGuard {
            pool: Arc::clone(self),
            path: path.to_path_buf(),
            file,
        })
    }

    /// Creates the file if absent (including parents) and takes an
    /// exclusive advisory lock, leaving any existing content untouched.
    /// Fails if an exclusive holder already exists for this path. Callers
    /// that need to overwrite the content do so explicitly through the
    /// held guard once they're ready to commit (spec §4.6 steps 2 and 9
    /// are separate: acquiring the lock must not itself discard a prior
    /// sidecar's content).
    pub fn create(self: &Arc<Self>, path: &Path) -> Result<ExclusiveGuard> {
        let mut map = self.entries.lock();
        if map.contains_key(path) {
            return Err(conflict(path));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_to_storage_error)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .map_err(io_to_storage_error)?;
        take_flock(&file, true).map_err(|_| conflict(path))?;
        let file = Arc::new(file);
        map.insert(
            path.to_path_buf(),
            Entry {
                mode: Mode::Exclusive,
                refcount: 1,
                file: Arc::clone(&file),
            },
        );
        Ok(ExclusiveGuard {
            pool: Arc::clone(self),
            path: path.to_path_buf(),
            file,
        })
    }

    /// Exclusive handle on an existing file; fails with `not-found` if
    /// absent, or a conflict error if already held.
    pub fn write(self: &Arc<Self>, path: &Path) -> Result<ExclusiveGuard> {
        let mut map = self.entries.lock();
        if map.contains_key(path) {
            return Err(conflict(path));
        }
        if !path.exists() {
            return Err(StorageError::ObjectNotFound {
                bucket: String::new(),
                key: path.display().to_string(),
            });
        }
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_to_storage_error)?;
        take_flock(&file, true).map_err(|_| conflict(path))?;
        let file = Arc::new(file);
        map.insert(
            path.to_path_buf(),
            Entry {
                mode: Mode::Exclusive,
                refcount: 1,
                file: Arc::clone(&file),
            },
        );
        Ok(ExclusiveGuard {
            pool: Arc::clone(self),
            path: path.to_path_buf(),
            file,
        })
    }

    fn close(&self, path: &Path) {
        let mut map = self.entries.lock();
        if let Some(entry) = map.get_mut(path) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                map.remove(path);
            }
        }
    }

    fn release_exclusive(&self, path: &Path) {
        let mut map = self.entries.lock();
        map.remove(path);
    }

    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.entries.lock().len()
    }
}

fn conflict(path: &Path) -> StorageError {
    StorageError::Unexpected(format!("lock contention on {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shared_handles_refcount_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        std::fs::write(&path, b"{}").unwrap();
        let pool = LockPool::new();
        let g1 = pool.open(&path).unwrap();
        let g2 = pool.open(&path).unwrap();
        assert_eq!(pool.held_count(), 1);
        drop(g1);
        assert_eq!(pool.held_count(), 1);
        drop(g2);
        assert_eq!(pool.held_count(), 0);
    }

    #[test]
    fn exclusive_create_then_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        let pool = LockPool::new();
        {
            let _g = pool.create(&path).unwrap();
            assert_eq!(pool.held_count(), 1);
        }
        assert_eq!(pool.held_count(), 0);
        assert!(path.exists());
    }

    #[test]
    fn exclusive_while_shared_held_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        std::fs::write(&path, b"{}").unwrap();
        let pool = LockPool::new();
        let _shared = pool.open(&path).unwrap();
        assert!(pool.create(&path).is_err());
    }

    #[test]
    fn write_on_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let pool = LockPool::new();
        assert!(matches!(
            pool.write(&path),
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn create_on_existing_file_preserves_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        std::fs::write(&path, b"{\"meta\":{}}").unwrap();
        let pool = LockPool::new();
        let guard = pool.create(&path).unwrap();
        let mut buf = Vec::new();
        use std::io::Read;
        (&*guard.file).read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"{\"meta\":{}}");
    }

    #[test]
    fn double_exclusive_create_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fs.json");
        let pool = LockPool::new();
        let _g = pool.create(&path).unwrap();
        assert!(pool.create(&path).is_err());
    }
}

//! Advisory OS locks enforcing a single writer per store.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Holds an advisory lock until dropped. Acquisition never blocks: a contended
/// lock fails with [`StoreError::Locked`].
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLock {
    /// Create (if needed) and exclusively lock a dedicated lock file.
    pub fn open_exclusive(path: &Path) -> StoreResult<Self> {
        let (file, _) = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?
            .into_parts();
        Self::try_acquire(&file, path, LockMode::Exclusive)
    }

    pub fn try_acquire(file: &File, path: &Path, mode: LockMode) -> StoreResult<Self> {
        let handle = file.try_clone()?;
        let outcome = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&handle),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&handle),
        };
        match outcome {
            Ok(()) => {
                tracing::trace!(lock.path = %path.display(), lock.mode = ?mode, "lock acquired");
                Ok(Self {
                    file: handle,
                    path: path.to_path_buf(),
                    mode,
                })
            }
            Err(err) if is_contended(&err) => Err(StoreError::Locked {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock.path = %self.path.display(), error = %err, "failed to release lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

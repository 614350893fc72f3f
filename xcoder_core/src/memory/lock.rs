//! Cross-process advisory locks on lock files.
//!
//! A [`CrossProcessMutex`] wraps one open lock file. `flock(2)` locks belong to
//! the open file description, so two handles opened on the same path exclude
//! each other whether they live in different processes or in different threads
//! of one process. The kernel drops the lock when the holder dies, so a crashed
//! process never wedges the registry.

use crate::error::{XcoderError, XcoderResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// An advisory lock shared between every process that opens the same path.
#[derive(Debug)]
pub struct CrossProcessMutex {
    file: File,
    path: PathBuf,
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    mutex: &'a CrossProcessMutex,
}

/// A held lock that owns its mutex, for locks kept across calls.
#[derive(Debug)]
pub struct OwnedLockGuard {
    mutex: CrossProcessMutex,
}

impl CrossProcessMutex {
    /// Open (creating if needed) the lock file at `path`.
    pub fn open(path: &Path) -> XcoderResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                XcoderError::unavailable(format!("cannot open lock file {}: {}", path.display(), e))
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Delete the lock file at `path`. Returns whether it existed. Holders
    /// keep their descriptor; later opens create a fresh file.
    pub fn remove(path: &Path) -> XcoderResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(XcoderError::unavailable(format!(
                "cannot remove lock file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> XcoderResult<LockGuard<'_>> {
        loop {
            match sys::lock_exclusive(&self.file, true) {
                Ok(true) => return Ok(LockGuard { mutex: self }),
                Ok(false) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(XcoderError::unavailable(format!(
                        "cannot lock {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }

    /// Take the lock if nobody holds it.
    pub fn try_lock(&self) -> XcoderResult<Option<LockGuard<'_>>> {
        match sys::lock_exclusive(&self.file, false) {
            Ok(true) => Ok(Some(LockGuard { mutex: self })),
            Ok(false) => Ok(None),
            Err(e) => Err(XcoderError::unavailable(format!(
                "cannot lock {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Poll [`try_lock`](Self::try_lock) every `wait` until `timeout` passes.
    pub fn lock_with_retry(
        &self,
        wait: Duration,
        timeout: Duration,
    ) -> XcoderResult<LockGuard<'_>> {
        self.acquire_with_retry(wait, timeout)?;
        Ok(LockGuard { mutex: self })
    }

    fn acquire_with_retry(&self, wait: Duration, timeout: Duration) -> XcoderResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match sys::lock_exclusive(&self.file, false) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    return Err(XcoderError::unavailable(format!(
                        "cannot lock {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
            if Instant::now() >= deadline {
                return Err(XcoderError::Timeout(format!(
                    "lock {} still held after {:?}",
                    self.path.display(),
                    timeout
                )));
            }
            std::thread::sleep(wait);
        }
    }

    /// Like [`lock_with_retry`](Self::lock_with_retry), but the guard takes
    /// ownership of the mutex.
    pub fn into_locked(self, wait: Duration, timeout: Duration) -> XcoderResult<OwnedLockGuard> {
        self.acquire_with_retry(wait, timeout)?;
        Ok(OwnedLockGuard { mutex: self })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OwnedLockGuard {
    pub fn path(&self) -> &Path {
        &self.mutex.path
    }

    /// Release now; the same as dropping the guard.
    pub fn unlock(self) {}
}

impl Drop for OwnedLockGuard {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.mutex.file) {
            log::error!("failed to unlock {}: {}", self.mutex.path.display(), e);
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.mutex.file) {
            log::error!("failed to unlock {}: {}", self.mutex.path.display(), e);
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    /// Returns Ok(false) when a non-blocking attempt finds the lock held.
    pub(super) fn lock_exclusive(file: &File, blocking: bool) -> std::io::Result<bool> {
        let flags = if blocking {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };
        // SAFETY: the descriptor is owned by `file`, which outlives this call
        let rc = unsafe { libc::flock(file.as_raw_fd(), flags) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if !blocking && err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Ok(false);
        }
        Err(err)
    }

    pub(super) fn unlock(file: &File) -> std::io::Result<()> {
        // SAFETY: the descriptor is owned by `file`, which outlives this call
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;

    pub(super) fn lock_exclusive(_file: &File, _blocking: bool) -> std::io::Result<bool> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "advisory file locks require a unix host",
        ))
    }

    pub(super) fn unlock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }
}

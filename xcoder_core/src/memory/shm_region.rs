// Shared memory region backed by a file in the resource directory.
//
// On Linux the resource directory defaults to /dev/shm, which is tmpfs
// (RAM-backed), so a mapped file there is a POSIX shared memory object in all
// but name. Segments are durable: dropping a region unmaps it and never removes
// the backing file. Removal is an explicit registry action.

use crate::error::{XcoderError, XcoderResult};
use bytemuck::Pod;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A mapped shared memory segment holding one fixed-size record.
#[derive(Debug)]
pub struct ShmRegion {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
    size: usize,
}

impl ShmRegion {
    /// Create a new segment. Fails with `AlreadyExists` if the backing object
    /// is already present, which is how callers detect a concurrent or earlier
    /// initialization.
    pub fn create(path: &Path, size: usize) -> XcoderResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(XcoderError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => {
                return Err(XcoderError::unavailable(format!(
                    "cannot create {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        set_group_rw(path);
        file.set_len(size as u64)?;

        // SAFETY: file is a valid open file whose length was just set to `size`
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        mmap.fill(0);

        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Open an existing segment. A missing object is `ResourceUnavailable`;
    /// an object shorter than `size` is `Corrupted`, since mapping past its end
    /// would fault on access.
    pub fn open(path: &Path, size: usize) -> XcoderResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                XcoderError::unavailable(format!("cannot open {}: {}", path.display(), e))
            })?;

        let len = file.metadata()?.len();
        if len < size as u64 {
            return Err(XcoderError::corrupted(format!(
                "{} is {} bytes, expected {}",
                path.display(),
                len,
                size
            )));
        }

        // SAFETY: file is a valid open file at least `size` bytes long (checked above)
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file) }.map_err(|e| {
            XcoderError::unavailable(format!("cannot map {}: {}", path.display(), e))
        })?;

        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Open the segment if present, otherwise create it. Returns whether this
    /// call created it.
    pub fn open_or_create(path: &Path, size: usize) -> XcoderResult<(Self, bool)> {
        match Self::create(path, size) {
            Ok(region) => Ok((region, true)),
            Err(XcoderError::AlreadyExists(_)) => Ok((Self::open(path, size)?, false)),
            Err(e) => Err(e),
        }
    }

    /// Delete the backing object. Returns false if it did not exist.
    pub fn remove(path: &Path) -> XcoderResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// View the start of the segment as a `T`.
    pub fn view<T: Pod>(&self) -> &T {
        bytemuck::from_bytes(&self.mmap[..std::mem::size_of::<T>()])
    }

    /// Mutable view of the start of the segment as a `T`.
    pub fn view_mut<T: Pod>(&mut self) -> &mut T {
        bytemuck::from_bytes_mut(&mut self.mmap[..std::mem::size_of::<T>()])
    }

    /// Synchronously write dirty pages back (msync MS_SYNC).
    pub fn flush(&self) -> XcoderResult<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Segments are shared between the users of a group (rw-rw----), matching the
/// permissions lock files get.
fn set_group_rw(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660));
    }
    #[cfg(not(unix))]
    let _ = path;
}

//! The device pool: the shared [`DeviceQueue`] and its lock.

use super::queue::DeviceQueue;
use crate::error::{XcoderError, XcoderResult};
use crate::memory::{CrossProcessMutex, LockGuard, RsrcPaths, ShmRegion};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Process-local handle to the pool segment.
#[derive(Debug)]
pub struct DevicePool {
    region: ShmRegion,
    lock: CrossProcessMutex,
}

/// The queue, borrowed under the pool lock.
pub struct PoolGuard<'a> {
    _lock: LockGuard<'a>,
    region: &'a mut ShmRegion,
}

impl DevicePool {
    fn size() -> usize {
        std::mem::size_of::<DeviceQueue>()
    }

    /// Open the existing pool; never creates it.
    ///
    /// The pool lock is tried without blocking every `retry_wait` for up to
    /// `timeout`, so a lock left held by a wedged process turns into an error
    /// instead of a hang.
    pub fn open(paths: &RsrcPaths, retry_wait: Duration, timeout: Duration) -> XcoderResult<Self> {
        if !paths.pool_shm().exists() {
            return Err(XcoderError::unavailable(format!(
                "device pool {} does not exist; run init first",
                paths.pool_shm().display()
            )));
        }
        let lock = CrossProcessMutex::open(&paths.pool_lock())?;

        let region = {
            let _guard = lock.lock_with_retry(retry_wait, timeout).map_err(|e| match e {
                XcoderError::Timeout(_) => XcoderError::unavailable(format!(
                    "cannot lock {} within {:?}; remove the NI_* objects under {} and re-run init",
                    paths.pool_lock().display(),
                    timeout,
                    paths.root().display()
                )),
                other => other,
            })?;
            ShmRegion::open(&paths.pool_shm(), Self::size())?
        };

        region.view::<DeviceQueue>().validate()?;
        Ok(Self { region, lock })
    }

    /// Exclusively create the pool and populate it in one pool-lock hold.
    ///
    /// Fails with `AlreadyExists` if the segment is present. `populate` runs
    /// on an initialized empty queue; if it fails the half-built segment is
    /// removed again.
    pub(crate) fn create<F>(paths: &RsrcPaths, populate: F) -> XcoderResult<Self>
    where
        F: FnOnce(&mut DeviceQueue) -> XcoderResult<()>,
    {
        let lock = CrossProcessMutex::open(&paths.pool_lock())?;

        let region = {
            let _guard = lock.lock()?;
            let mut region = ShmRegion::create(&paths.pool_shm(), Self::size())?;
            let queue = region.view_mut::<DeviceQueue>();
            queue.init();

            if let Err(e) = populate(queue) {
                drop(region);
                ShmRegion::remove(&paths.pool_shm())?;
                return Err(e);
            }
            region.flush()?;
            region
        };

        Ok(Self { region, lock })
    }

    /// Take the pool lock.
    pub fn lock(&mut self) -> XcoderResult<PoolGuard<'_>> {
        let Self { region, lock } = self;
        let guard = lock.lock()?;
        Ok(PoolGuard {
            _lock: guard,
            region,
        })
    }

    /// Explicit end of scope; the same as dropping the pool.
    pub fn free(self) {}
}

impl PoolGuard<'_> {
    pub fn flush(&self) {
        if let Err(e) = self.region.flush() {
            log::error!("msync {}: {}", self.region.path().display(), e);
        }
    }
}

impl Deref for PoolGuard<'_> {
    type Target = DeviceQueue;

    fn deref(&self) -> &DeviceQueue {
        self.region.view()
    }
}

impl DerefMut for PoolGuard<'_> {
    fn deref_mut(&mut self) -> &mut DeviceQueue {
        self.region.view_mut()
    }
}

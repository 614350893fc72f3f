//! Scoped access to one module's shared record.
//!
//! A [`DeviceContext`] owns the mapping of the record and the descriptor of
//! its lock file. Both are released when the context drops, on every path.
//! Mutable fields are reached only through a [`DeviceGuard`], which holds the
//! device lock for as long as it lives.

use super::info::DeviceInfo;
use super::DeviceType;
use crate::error::{XcoderError, XcoderResult};
use crate::memory::{CrossProcessMutex, LockGuard, RsrcPaths, ShmRegion};
use std::ops::{Deref, DerefMut};

/// Process-local handle to a shared [`DeviceInfo`].
#[derive(Debug)]
pub struct DeviceContext {
    device_type: DeviceType,
    guid: i32,
    shm_name: String,
    region: ShmRegion,
    lock: CrossProcessMutex,
}

/// Locked view of a module's record.
pub struct DeviceGuard<'a> {
    _lock: LockGuard<'a>,
    region: &'a mut ShmRegion,
}

impl DeviceContext {
    /// Map an existing record. Any failure (missing segment, bad size, bad
    /// header, lock file) is reported as `ResourceUnavailable`.
    pub fn open(paths: &RsrcPaths, device_type: DeviceType, guid: i32) -> XcoderResult<Self> {
        let device_type = device_type.xcoder();
        let shm_name = RsrcPaths::device_shm_name(device_type, guid);

        let attempt = || -> XcoderResult<(ShmRegion, CrossProcessMutex)> {
            let region = ShmRegion::open(
                &paths.device_shm(device_type, guid),
                std::mem::size_of::<DeviceInfo>(),
            )?;
            region.view::<DeviceInfo>().validate(device_type, guid)?;
            let lock = CrossProcessMutex::open(&paths.device_lock(device_type, guid))?;
            Ok((region, lock))
        };

        match attempt() {
            Ok((region, lock)) => Ok(Self {
                device_type,
                guid,
                shm_name,
                region,
                lock,
            }),
            Err(XcoderError::ResourceUnavailable(msg)) => Err(XcoderError::ResourceUnavailable(msg)),
            Err(e) => Err(XcoderError::unavailable(format!("{}: {}", shm_name, e))),
        }
    }

    /// Create (or overwrite) the record for `info`'s identity and its lock file.
    pub(crate) fn create(paths: &RsrcPaths, info: &DeviceInfo) -> XcoderResult<Self> {
        let device_type = info
            .device_type()
            .ok_or_else(|| crate::xcoder_internal!("record without device type"))?;
        let guid = info.module_id;
        let shm_name = RsrcPaths::device_shm_name(device_type, guid);
        log::info!("shm_name: {}, lck_name: {}", shm_name, RsrcPaths::device_lock_name(device_type, guid));

        let (region, _created) = ShmRegion::open_or_create(
            &paths.device_shm(device_type, guid),
            std::mem::size_of::<DeviceInfo>(),
        )?;
        let lock = CrossProcessMutex::open(&paths.device_lock(device_type, guid))?;

        let mut ctx = Self {
            device_type,
            guid,
            shm_name,
            region,
            lock,
        };
        {
            let mut guard = ctx.lock()?;
            *guard = *info;
            guard.flush();
        }
        Ok(ctx)
    }

    /// Delete the segment and lock file of `(device_type, guid)`.
    pub(crate) fn remove_objects(
        paths: &RsrcPaths,
        device_type: DeviceType,
        guid: i32,
    ) -> XcoderResult<()> {
        ShmRegion::remove(&paths.device_shm(device_type, guid))?;
        CrossProcessMutex::remove(&paths.device_lock(device_type, guid))?;
        Ok(())
    }

    /// Take the device lock.
    pub fn lock(&mut self) -> XcoderResult<DeviceGuard<'_>> {
        let Self { region, lock, .. } = self;
        let guard = lock.lock()?;
        Ok(DeviceGuard {
            _lock: guard,
            region,
        })
    }

    /// Copy of the record taken under the device lock.
    pub fn snapshot(&mut self) -> XcoderResult<DeviceInfo> {
        let guard = self.lock()?;
        Ok(*guard)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn guid(&self) -> i32 {
        self.guid
    }

    pub fn shm_name(&self) -> &str {
        &self.shm_name
    }

    /// Explicit end of scope; the same as dropping the context.
    pub fn free(self) {}
}

impl DeviceGuard<'_> {
    /// Push the record to the backing object; failures are logged, the
    /// mapping itself is already shared.
    pub fn flush(&self) {
        if let Err(e) = self.region.flush() {
            log::error!("msync {}: {}", self.region.path().display(), e);
        }
    }
}

impl Deref for DeviceGuard<'_> {
    type Target = DeviceInfo;

    fn deref(&self) -> &DeviceInfo {
        self.region.view()
    }
}

impl DerefMut for DeviceGuard<'_> {
    fn deref_mut(&mut self) -> &mut DeviceInfo {
        self.region.view_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_sees_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());

        let mut info = DeviceInfo::new(DeviceType::Encoder, 2);
        info.set_dev_name("/dev/nvme1n1");
        info.hw_id = 1;
        drop(DeviceContext::create(&paths, &info).unwrap());

        let mut ctx = DeviceContext::open(&paths, DeviceType::Upload, 2).unwrap();
        assert_eq!(ctx.device_type(), DeviceType::Encoder);
        assert_eq!(ctx.shm_name(), "NI_shm_e2");
        let snap = ctx.snapshot().unwrap();
        assert_eq!(snap.dev_name(), "/dev/nvme1n1");
        assert_eq!(snap.hw_id, 1);
    }

    #[test]
    fn writes_through_guard_are_shared() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());
        let mut a = DeviceContext::create(&paths, &DeviceInfo::new(DeviceType::Decoder, 0)).unwrap();
        let mut b = DeviceContext::open(&paths, DeviceType::Decoder, 0).unwrap();

        a.lock().unwrap().load = 55;
        assert_eq!(b.snapshot().unwrap().load, 55);
    }

    #[test]
    fn open_failures_are_resource_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());

        let missing = DeviceContext::open(&paths, DeviceType::Encoder, 9).unwrap_err();
        assert!(matches!(missing, XcoderError::ResourceUnavailable(_)));

        // right size, wrong identity
        drop(DeviceContext::create(&paths, &DeviceInfo::new(DeviceType::Encoder, 1)).unwrap());
        std::fs::copy(
            paths.device_shm(DeviceType::Encoder, 1),
            paths.device_shm(DeviceType::Encoder, 3),
        )
        .unwrap();
        let mismatch = DeviceContext::open(&paths, DeviceType::Encoder, 3).unwrap_err();
        assert!(matches!(mismatch, XcoderError::ResourceUnavailable(_)));
    }

    #[test]
    fn remove_objects_deletes_segment_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());
        drop(DeviceContext::create(&paths, &DeviceInfo::new(DeviceType::Ai, 0)).unwrap());

        DeviceContext::remove_objects(&paths, DeviceType::Ai, 0).unwrap();
        assert!(!paths.device_shm(DeviceType::Ai, 0).exists());
        assert!(!paths.device_lock(DeviceType::Ai, 0).exists());
    }
}

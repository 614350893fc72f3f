//! # Device registry
//!
//! The shared state every process on the host sees: one pool segment with the
//! per-type device queues, one record segment per module, and their lock
//! files. [`Registry`] resolves names under the configured resource directory
//! and implements every operation that needs no card access: context and pool
//! access, listing, removal, direct allocation and release.
//!
//! Lock order is pool, then device. At most one device lock is held at a time.

pub mod listing;
pub mod pool;
pub mod queue;

pub use listing::{print_device_info, AllDevices};
pub use pool::{DevicePool, PoolGuard};
pub use queue::{DeviceQueue, EMPTY_SLOT, QUEUE_MAGIC, QUEUE_VERSION};

use crate::config::RsrcConfig;
use crate::device::{
    capacity::job_pixels, Codec, DeviceContext, DeviceInfo, DeviceType, ReferenceCapacityTable,
    MAX_DEVICE_CNT,
};
use crate::error::{XcoderError, XcoderResult};
use crate::memory::{CrossProcessMutex, OwnedLockGuard, RsrcPaths, ShmRegion};
use std::collections::BTreeSet;

/// Move `guid` to the back of its type's queue, making it the last choice of
/// the next least-recently-used scan. The caller must hold the pool lock,
/// which a [`PoolGuard`] proves.
pub fn move_to_end_of_pool(device_type: DeviceType, guid: i32, queue: &mut PoolGuard<'_>) -> bool {
    let moved = queue.move_to_end(device_type.xcoder(), guid);
    if moved {
        queue.flush();
    } else {
        log::warn!("{} {} is not in the device pool", device_type, guid);
    }
    moved
}

/// A module handed to a job.
#[derive(Debug)]
pub struct Allocation {
    pub context: DeviceContext,
    /// Pixel rate added to the module's `xcode_load_pixel`; zero when nothing
    /// was reserved.
    pub reserved_load: u64,
}

impl Allocation {
    pub fn guid(&self) -> i32 {
        self.context.guid()
    }

    pub fn device_type(&self) -> DeviceType {
        self.context.device_type()
    }

    /// Return the reservation and drop the context.
    pub fn release(mut self) -> XcoderResult<()> {
        release(&mut self.context, self.reserved_load)
    }
}

/// Give back `reserved_load` pixels per second of a module.
///
/// A release larger than the current reservation is logged and ignored, so
/// the counter never underflows.
pub fn release(ctx: &mut DeviceContext, reserved_load: u64) -> XcoderResult<()> {
    let mut info = ctx.lock()?;
    if info.xcode_load_pixel < reserved_load {
        log::warn!(
            "{} {}: releasing {} exceeds reserved {}, ignored",
            info.device_type().map_or("?", DeviceType::as_str),
            info.module_id,
            reserved_load,
            info.xcode_load_pixel
        );
        return Ok(());
    }
    info.xcode_load_pixel -= reserved_load;
    log::debug!(
        "{} {}: released {}, now {}",
        info.dev_name(),
        info.module_id,
        reserved_load,
        info.xcode_load_pixel
    );
    info.flush();
    Ok(())
}

/// Add `load` pixels per second to a module's reservation. A sum that does
/// not fit leaves the record untouched.
pub(crate) fn reserve(ctx: &mut DeviceContext, load: u64) -> XcoderResult<()> {
    let mut info = ctx.lock()?;
    let Some(total) = info.xcode_load_pixel.checked_add(load) else {
        return Err(XcoderError::invalid_input(format!(
            "{} {}: reserving {} on top of {} overflows",
            info.dev_name(),
            info.module_id,
            load,
            info.xcode_load_pixel
        )));
    };
    info.xcode_load_pixel = total;
    info.flush();
    log::debug!(
        "{} {}: reserved {}, now {}",
        info.dev_name(),
        info.module_id,
        load,
        total
    );
    Ok(())
}

/// Backend-free entry point to the shared registry.
#[derive(Debug, Clone)]
pub struct Registry {
    config: RsrcConfig,
    paths: RsrcPaths,
    reference: ReferenceCapacityTable,
}

impl Registry {
    pub fn new(config: RsrcConfig) -> Self {
        let paths = RsrcPaths::new(config.rsrc_dir());
        let reference = config.reference_table();
        Self {
            config,
            paths,
            reference,
        }
    }

    pub fn config(&self) -> &RsrcConfig {
        &self.config
    }

    pub fn paths(&self) -> &RsrcPaths {
        &self.paths
    }

    pub fn reference_table(&self) -> &ReferenceCapacityTable {
        &self.reference
    }

    /// Open the existing pool, waiting a bounded time for its lock.
    pub fn get_device_pool(&self) -> XcoderResult<DevicePool> {
        DevicePool::open(
            &self.paths,
            self.config.pool_lock_retry(),
            self.config.pool_lock_timeout(),
        )
    }

    /// Map one module's record.
    pub fn get_device_context(&self, device_type: DeviceType, guid: i32) -> XcoderResult<DeviceContext> {
        check_guid(guid)?;
        DeviceContext::open(&self.paths, device_type, guid)
    }

    /// Locked copy of one module's record.
    pub fn get_device_info(&self, device_type: DeviceType, guid: i32) -> XcoderResult<DeviceInfo> {
        self.get_device_context(device_type, guid)?.snapshot()
    }

    /// GUID of the `device_type` module living on device `name`.
    pub fn get_device_by_block_name(
        &self,
        name: &str,
        device_type: DeviceType,
    ) -> XcoderResult<Option<i32>> {
        let device_type = device_type.xcoder();
        let mut pool = self.get_device_pool()?;
        let queue = pool.lock()?;

        for &guid in queue.guids(device_type) {
            match self.get_device_context(device_type, guid) {
                Ok(mut ctx) => {
                    if ctx.snapshot()?.dev_name() == name {
                        return Ok(Some(guid));
                    }
                }
                Err(e) => log::warn!("skipping {} {}: {}", device_type, guid, e),
            }
        }
        Ok(None)
    }

    /// Device paths with at least one registered module, in registry order.
    pub fn registered_devices(&self) -> XcoderResult<Vec<String>> {
        let mut pool = self.get_device_pool()?;
        let queue = pool.lock()?;
        self.registered_devices_locked(&queue)
    }

    pub(crate) fn registered_devices_locked(&self, queue: &DeviceQueue) -> XcoderResult<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for device_type in DeviceType::XCODERS {
            for &guid in queue.guids(device_type) {
                let name = match self.get_device_context(device_type, guid) {
                    Ok(mut ctx) => ctx.snapshot()?.dev_name().into_owned(),
                    Err(e) => {
                        log::warn!("skipping {} {}: {}", device_type, guid, e);
                        continue;
                    }
                };
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    /// Unregister every module of device `path`. Returns how many modules
    /// were removed.
    ///
    /// A module whose objects cannot be deleted stays queued and the first
    /// such error is returned after every other module has been handled.
    pub fn remove_device(&self, path: &str) -> XcoderResult<usize> {
        let mut pool = self.get_device_pool()?;
        let mut queue = pool.lock()?;
        let removed = self.remove_device_locked(&mut queue, path);
        queue.flush();
        removed
    }

    pub(crate) fn remove_device_locked(&self, queue: &mut DeviceQueue, path: &str) -> XcoderResult<usize> {
        let mut total = 0;
        let mut first_err = None;
        for device_type in DeviceType::XCODERS {
            let mut matches = Vec::new();
            for &guid in queue.guids(device_type) {
                let Ok(mut ctx) = self.get_device_context(device_type, guid) else {
                    continue;
                };
                match ctx.snapshot() {
                    Ok(info) if info.dev_name() == path => matches.push(guid),
                    Ok(_) => {}
                    Err(e) => log::warn!("skipping {} {}: {}", device_type, guid, e),
                }
            }

            let (removed, err) = unregister(
                queue,
                device_type,
                &matches,
                |guid| DeviceContext::remove_objects(&self.paths, device_type, guid),
                |guid| self.paths.device_shm(device_type, guid).exists(),
            );
            total += removed;
            if let Some(e) = err {
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        if total == 0 {
            log::info!("{} is not registered", path);
        }
        Ok(total)
    }

    /// Unregister every device, then delete the pool, its lock and the
    /// per-type retry locks.
    pub fn remove_all_devices(&self) -> XcoderResult<usize> {
        let mut total = 0;
        if self.paths.pool_shm().exists() {
            for path in self.registered_devices()? {
                total += self.remove_device(&path)?;
            }
        }

        ShmRegion::remove(&self.paths.pool_shm())?;
        for device_type in DeviceType::XCODERS {
            CrossProcessMutex::remove(&self.paths.retry_lock(device_type))?;
        }
        CrossProcessMutex::remove(&self.paths.pool_lock())?;
        log::info!("removed all devices ({} modules)", total);
        Ok(total)
    }

    /// Take the per-type retry lock, serializing session-open retries across
    /// processes. Dropping the guard unlocks it.
    pub fn lock_and_open(&self, device_type: DeviceType) -> XcoderResult<OwnedLockGuard> {
        let wait = self.config.retry_lock_wait();
        let timeout = wait * self.config.retry_lock_attempts;
        CrossProcessMutex::open(&self.paths.retry_lock(device_type))?.into_locked(wait, timeout)
    }

    /// Create the per-type retry lock files.
    pub(crate) fn create_retry_locks(&self) -> XcoderResult<()> {
        for device_type in DeviceType::XCODERS {
            let path = self.paths.retry_lock(device_type);
            let mut attempt = 1;
            loop {
                match CrossProcessMutex::open(&path) {
                    Ok(_) => break,
                    Err(e) if attempt < self.config.lock_file_attempts => {
                        log::warn!("{} (attempt {})", e, attempt);
                        std::thread::sleep(self.config.lock_file_backoff());
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Bind a job to a caller-chosen module.
    ///
    /// No scan and no admission check. Encoders reserve the job's pixel rate
    /// when the reference table knows the codec. The module is then requeued
    /// at the back of the pool.
    pub fn allocate_direct(
        &self,
        device_type: DeviceType,
        guid: i32,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> XcoderResult<Allocation> {
        let device_type = device_type.xcoder();
        let mut ctx = self.get_device_context(device_type, guid)?;

        let mut reserved_load = 0;
        if device_type == DeviceType::Encoder && !self.reference.get(device_type, codec).is_zero() {
            reserved_load = job_pixels(width, height, fps).ok_or_else(|| {
                XcoderError::invalid_input(format!(
                    "{}x{}@{} overflows the pixel rate",
                    width, height, fps
                ))
            })?;
            reserve(&mut ctx, reserved_load)?;
        }

        let mut pool = self.get_device_pool()?;
        let mut queue = pool.lock()?;
        move_to_end_of_pool(device_type, guid, &mut queue);

        Ok(Allocation {
            context: ctx,
            reserved_load,
        })
    }
}

/// Delete the objects of each of `guids` and drop the deleted ones from the
/// queue. A module whose record survives a failed delete stays queued, so the
/// queue never names a record that is gone.
fn unregister(
    queue: &mut DeviceQueue,
    device_type: DeviceType,
    guids: &[i32],
    mut delete: impl FnMut(i32) -> XcoderResult<()>,
    record_exists: impl Fn(i32) -> bool,
) -> (usize, Option<XcoderError>) {
    let mut gone = Vec::with_capacity(guids.len());
    let mut first_err = None;
    for &guid in guids {
        match delete(guid) {
            Ok(()) => {
                log::info!(
                    "removed {} {} ({})",
                    device_type,
                    guid,
                    RsrcPaths::device_shm_name(device_type, guid)
                );
                gone.push(guid);
            }
            Err(e) => {
                log::error!("cannot remove {} {}: {}", device_type, guid, e);
                if !record_exists(guid) {
                    gone.push(guid);
                }
                first_err.get_or_insert(e);
            }
        }
    }
    (queue.remove_guids(device_type, &gone), first_err)
}

pub(crate) fn check_guid(guid: i32) -> XcoderResult<()> {
    if (0..MAX_DEVICE_CNT as i32).contains(&guid) {
        Ok(())
    } else {
        Err(XcoderError::invalid_input(format!(
            "guid {} outside [0, {})",
            guid, MAX_DEVICE_CNT
        )))
    }
}
